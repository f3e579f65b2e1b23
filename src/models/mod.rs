pub mod circuit_breaker;
pub mod email;
pub mod envelope;
pub mod fcm;
pub mod health;
pub mod notification;
pub mod outcome;
pub mod response;
pub mod retry;
pub mod template;
pub mod validation;
