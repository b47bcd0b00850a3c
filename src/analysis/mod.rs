pub mod synthesis;
pub mod tokens;
