/// Normalized residual beyond which an observation is down-weighted
pub const DEFAULT_OUTLIER_LIMIT: f64 = 2.5;

/// Maximal number of reweighting iterations
pub const DEFAULT_IRLS_MAX_ITERATIONS: usize = 10;

/// Two sided significance of the Chi-square variance test
pub const DEFAULT_CHI2_ALPHA: f64 = 0.05;

/// Weights below machine precision are replaced by this value
/// when forming the final covariance matrix.
pub const WEIGHT_FLOOR: f64 = 1.0E-6;

/// Height code every antenna height is normalized to
pub const DHARP: &str = "DHARP";

/// Days per julian year
pub const DAYS_PER_YEAR: f64 = 365.25;

/// Seconds per day
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Year of the open ended validity sentinel
pub const OPEN_END_YEAR: i32 = 9999;
