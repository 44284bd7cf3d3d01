pub mod analytics_service;
pub mod attempt_service;
pub mod availability_service;
pub mod identity_service;
pub mod test_service;
