//! Orquestación del pipeline por frame.
//
// El worker recibe frames de la fuente, ejecuta la inferencia fuera de
// cualquier lock y entrega la máscara al compositor; el callback de pintado
// de egui llama a `Compositor::present` en cada redibujado.
pub mod compositor;
pub mod state;
pub mod worker;

pub use compositor::{Compositor, Presentation};
pub use state::{PipelineState, StateCell};
pub use worker::{FrameWorker, RedrawRequester, WorkerStats};
