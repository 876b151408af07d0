pub mod fakes;
pub mod test_app;
