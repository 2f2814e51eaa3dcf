// PSEC4 log format
pub const DEFAULT_SAMPLES_PER_EVENT: usize = 256;
pub const DEFAULT_CHANNELS: usize = 6;
pub const DEFAULT_TIME_STEP_NS: f64 = 0.1;
pub const COMMENT_MARKER: char = '#';

// Physics
pub const ELEMENTARY_CHARGE: f64 = 1.6e-19; // C
pub const SPEED_OF_LIGHT: f64 = 3.0e8; // m/s
pub const NS_TO_S: f64 = 1.0e-9;
pub const MV_PER_V: f64 = 1000.0;

// Test stand geometry and electronics
pub const DEFAULT_LOAD_RESISTANCE: f64 = 50.0; // Ohm
pub const DEFAULT_HALF_GAP_DISTANCE: f64 = 0.06; // m
pub const DEFAULT_TILE_LENGTH: f64 = 0.058; // m
pub const DEFAULT_STRIP_LENGTH: f64 = 0.12; // m
pub const DEFAULT_SIGNAL_VELOCITY: f64 = 6.0e7; // m/s
pub const DEFAULT_MAX_GAIN: f64 = 2.0e7;

// Fitting
pub const DEFAULT_LOBE_WIDTH_NS: f64 = 0.1;
pub const DEFAULT_MAX_ITERATIONS: usize = 1000;
pub const DEFAULT_FIT_TOLERANCE: f64 = 1.49012e-8;
