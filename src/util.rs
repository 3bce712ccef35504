//! Small platform utilities shared across the controller and worker binaries.

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
