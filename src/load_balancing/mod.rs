//! Load balancing strategies usable independently of the resolver.

pub mod smooth;
