// Copyright @yucwang 2021

pub mod bpt;
pub mod lt;
pub mod ltdirect;
pub mod manifold;
pub mod pt;
pub mod ptdirect;
pub mod ptmnee;
