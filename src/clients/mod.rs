pub mod channel;
pub mod circuit_breaker;
pub mod email;
pub mod fcm;
pub mod health;
pub mod mail_relay;
pub mod rbmq;
pub mod redis;
pub mod template;
