pub mod article;
pub mod entity;
pub mod glossary;
pub mod job;
pub mod logs;

pub use article::*;
pub use entity::*;
pub use glossary::*;
pub use job::*;
pub use logs::*;
