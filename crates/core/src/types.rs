/// Tenants are identified by the website/property id issued at signup.
pub type TenantId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
