pub mod count_type;
pub mod rolling_encoder;
