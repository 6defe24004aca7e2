pub mod action;
pub mod common;
pub mod flow;

use crate::runtime::definition::NodeKind;
use crate::runtime::node::NodeBehavior;

use self::action::{AutomaticTaskNode, UserTaskNode};
use self::common::{EndNode, StartNode};
use self::flow::{ExclusiveGatewayNode, ParallelGatewayNode};

static START: StartNode = StartNode;
static END: EndNode = EndNode;
static USER_TASK: UserTaskNode = UserTaskNode;
static AUTOMATIC_TASK: AutomaticTaskNode = AutomaticTaskNode;
static EXCLUSIVE: ExclusiveGatewayNode = ExclusiveGatewayNode;
static PARALLEL: ParallelGatewayNode = ParallelGatewayNode;

/// Behaviour executing nodes of `kind`.
pub fn behavior_for(kind: NodeKind) -> &'static dyn NodeBehavior {
    match kind {
        NodeKind::Start => &START,
        NodeKind::End => &END,
        NodeKind::UserTask => &USER_TASK,
        NodeKind::AutomaticTask => &AUTOMATIC_TASK,
        NodeKind::ExclusiveGateway => &EXCLUSIVE,
        NodeKind::ParallelGateway => &PARALLEL,
    }
}
