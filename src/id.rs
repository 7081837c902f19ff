use uuid::Uuid;

/// Time-ordered identifier used for every stored record.
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

pub fn is_uuid(value: &str) -> bool {
    Uuid::parse_str(value).is_ok()
}
