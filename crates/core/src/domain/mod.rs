pub mod action;
pub mod artifact;
pub mod event;
pub mod message;
pub mod tenant;
