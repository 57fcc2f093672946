//! Maps host log lines to user-facing startup notices

/// Outcome a host log line says about a robot start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupStatus {
    Success(&'static str),
    Error(&'static str),
}

impl StartupStatus {
    pub fn message(&self) -> &'static str {
        match self {
            StartupStatus::Success(m) | StartupStatus::Error(m) => *m,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, StartupStatus::Error(_))
    }
}

/// Classify one host log line. Most lines say nothing and return `None`.
pub fn startup_status_from_log(line: &str) -> Option<StartupStatus> {
    let normalized = line.to_lowercase();
    let has = |needle: &str| normalized.contains(needle);

    if has("waiting for commands") {
        return Some(StartupStatus::Success("Robot started successfully."));
    }

    if has("serial") || has("tty") || has("usb") || has("port not found") {
        return Some(StartupStatus::Error(
            "Arms not connected. Check USB/data cables and arm power.",
        ));
    }

    if has("timed out")
        || has("connection refused")
        || has("network is unreachable")
        || has("failed to connect")
    {
        return Some(StartupStatus::Error(
            "Robot network unavailable. Confirm Wi-Fi/Ethernet and robot IP.",
        ));
    }

    if has("permission denied") || has("access denied") {
        return Some(StartupStatus::Error(
            "Permission blocked. Restart app with required system permissions.",
        ));
    }

    if has("calibration") && (has("missing") || has("invalid")) {
        return Some(StartupStatus::Error(
            "Calibration missing or invalid. Re-run calibration before starting.",
        ));
    }

    if has("traceback") || has("exception") || has("error") {
        return Some(StartupStatus::Error(
            "Robot start failed with an internal error. Check robot service health.",
        ));
    }

    None
}

/// Like `startup_status_from_log`, but ignores lines tagged for other robots.
/// Host lines are prefixed `[nickname]`.
pub fn startup_status_for(nickname: &str, line: &str) -> Option<StartupStatus> {
    if !nickname.is_empty() && !line.contains(&format!("[{}]", nickname)) {
        return None;
    }
    startup_status_from_log(line)
}
