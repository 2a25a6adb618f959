pub mod login;
pub mod run;
pub mod switch;
pub mod verification;
