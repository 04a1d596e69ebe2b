pub mod sort;
pub mod soundex;
pub mod translit;
