pub mod constants;
pub mod db_connect;
pub mod decisions;
pub mod env;
