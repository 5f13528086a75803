pub mod ids;
pub mod pair;
pub mod rate;
pub mod tick;
