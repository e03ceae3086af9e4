//! Coordinador de un job: prepara la entrada, corre las etapas con barreras
//! entre ellas y publica la salida.

pub mod driver;
pub mod input;
pub mod stages;
pub mod state;

pub use driver::{run_job, run_job_with};
pub use input::{prepare_input, InputSegment};
pub use state::{JobContext, WorkDir};
