pub mod classifier_service;
pub mod validator;
