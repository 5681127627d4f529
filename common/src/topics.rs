pub const DEFAULT_TOPIC_ROOT: &str = "dimmer";

pub const LWT_ONLINE: &str = "Online";
pub const LWT_OFFLINE: &str = "Offline";

pub fn cmd_topic(root: &str) -> String {
    format!("{root}/cmd")
}

/// Filter matching every per-channel command topic (`{root}/cmd/sliderN`).
pub fn slider_cmd_filter(root: &str) -> String {
    format!("{root}/cmd/+")
}

pub fn slider_cmd_topic(root: &str, channel: usize) -> String {
    format!("{root}/cmd/{}", crate::channel::persist_key(channel))
}

pub fn lwt_topic(root: &str) -> String {
    format!("{root}/status/LWT")
}

pub fn version_topic(root: &str) -> String {
    format!("{root}/status/Version")
}

pub fn hostname_topic(root: &str) -> String {
    format!("{root}/status/Hostname")
}

pub fn start_time_topic(root: &str) -> String {
    format!("{root}/status/StartTime")
}

pub fn state_topic(root: &str) -> String {
    format!("{root}/json/State")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_hang_off_the_root() {
        assert_eq!(cmd_topic("desk"), "desk/cmd");
        assert_eq!(slider_cmd_filter("desk"), "desk/cmd/+");
        assert_eq!(slider_cmd_topic("desk", 1), "desk/cmd/slider2");
        assert_eq!(lwt_topic("desk"), "desk/status/LWT");
        assert_eq!(state_topic("desk"), "desk/json/State");
    }
}
