pub mod counter;
pub mod lockout;
pub mod rate_limit;
pub mod rules;
