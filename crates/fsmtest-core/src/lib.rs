pub mod error;
pub mod symbols;
pub mod trace;
pub mod segmented;
pub mod tree;
pub mod output_tree;
pub mod tables;
pub mod hitting;
pub mod fsm;
pub mod dfsm;
pub mod safe;
pub mod suite;

pub use error::FsmError;
pub use fsm::Fsm;
pub use dfsm::Dfsm;
