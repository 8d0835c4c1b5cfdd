pub mod approval;
pub mod quotation;
pub mod user;
