pub type Principal = String;
pub type UserKey = String;
pub type CouponId = u64;
pub type Points = u64;
/// Unix seconds.
pub type Timestamp = u64;
