//! Action plans and planner output decoding.

mod parser;
mod plan;

pub use parser::{decode_plan, extract_json_object, parse_lenient, strip_code_fence, PlanDecode};
pub use plan::{
    ActionKind, Confidence, Plan, Step, StepPayload, SwipeDirection, PARSE_ERROR_MARKER,
};
