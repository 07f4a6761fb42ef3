/// Jobs are identified by an opaque random UUID assigned at submission.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// A point in model or camera space.
pub type Vec3 = [f64; 3];

/// A point in image pixel space.
pub type Vec2 = [f64; 2];

/// A mesh triangle as three vertex indices.
pub type Face = [u32; 3];
