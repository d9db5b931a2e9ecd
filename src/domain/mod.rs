// Domain layer: typed records decoded at the API boundary, and ports (interfaces).

pub mod model;
pub mod ports;
