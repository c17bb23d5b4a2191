// Domain layer: data model and ports. Adapters implement the ports, core drives them.

pub mod context;
pub mod credentials;
pub mod model;
pub mod outcome;
pub mod ports;
pub mod table;
