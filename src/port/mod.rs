pub use output::{StreamOutput, Subscription};
pub use scalar::ScalarInput;
pub use stream::StreamInput;

mod output;
mod scalar;
mod stream;
