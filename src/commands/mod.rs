pub mod click;
pub mod detect;
pub mod replay;
pub mod utils;
pub mod version;
pub mod wait_load;
