use wm_core::MachineService;

#[derive(Clone)]
pub struct AppState {
    pub service: MachineService,
}
