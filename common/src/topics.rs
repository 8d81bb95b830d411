pub const TOPIC_BUTTON_PAIRING: &str = "perfektday/button/pairing";
pub const TOPIC_BUTTON_REVIEW: &str = "perfektday/button/review";

pub const TOPIC_INDICATOR_STATE: &str = "perfektday/indicator/state";
pub const TOPIC_CONTROLLER_STATE: &str = "perfektday/controller/state";
