mod checkout_session;
mod course;
mod customer;
mod enrollment;
mod subscription;

pub use checkout_session::*;
pub use course::*;
pub use customer::*;
pub use enrollment::*;
pub use subscription::*;
