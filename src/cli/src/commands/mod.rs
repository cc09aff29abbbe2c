pub mod replay;
pub mod run;
pub mod simulate;
