pub mod run;
pub mod weight;
