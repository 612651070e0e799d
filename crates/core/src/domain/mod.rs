pub mod contract;
pub mod news;
pub mod profile;
pub mod response;
pub mod risk;
