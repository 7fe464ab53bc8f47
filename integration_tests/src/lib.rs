pub mod sim_board;
pub mod sim_line;
pub mod sim_monitor;
pub mod utils;

pub mod prelude {
    pub use super::sim_board::{MemEeprom, SimBoard};
    pub use super::sim_line::{SimLine, SimLineReceiver, SimLineSender};
    pub use super::sim_monitor::SimMonitor;
    pub use super::utils::{
        get_controller, test_with_background_process, LineMonitor, SimNode, TestContext, TestNode,
    };
    pub use hanbus_client::{ClientError, Controller};
    pub use hanbus_common::{IrqReason, NodeAddress};
    pub use hanbus_node::{Callbacks, Node};
}
