pub mod model;
pub mod relative_time;
pub mod snowflake;
pub mod util;
