use crate::case::grad_p::DrivingForce;
use crate::case::time::Time;
use crate::case::transport::TransportProperties;
use crate::case::Case;
use crate::error::Result;
use crate::solver::les;
use crate::solver::mesh::channel_mesh;
use crate::solver::piso::PisoSolver;
use std::path::Path;
use std::time::Instant;

/// Set up the case and drive the time loop: per step, a fresh solution
/// control snapshot, one controller invocation, then field writes and the
/// driving-force store on output steps.
pub fn run(root: &Path) -> Result<()> {
    let case = Case::new(root);

    let transport = TransportProperties::read(&case)?;
    let ctrl = case.control_dict()?;
    let mesh_dict = case.mesh_dict()?;
    let mesh = channel_mesh(mesh_dict.nx, mesh_dict.ny, mesh_dict.length, mesh_dict.height);

    let (start_name, start_value) = case.latest_time()?;
    log::info!("Reading field p");
    let p = case.read_scalar_field(&start_name, "p")?;
    log::info!("Reading field U");
    let u = case.read_vector_field(&start_name, "U")?;
    let phi = case
        .read_scalar_field_if_present(&start_name, "phi")?
        .map(|f| f.values);

    let fv = case.fv_solution()?;
    let turb_props = case.turbulence_properties()?;
    let turbulence = les::make_model(&turb_props, transport.nu, mesh.num_cells())?;
    log::info!("Selecting LES turbulence model {}", turbulence.name());

    let driving_force = DrivingForce::load(&case.time_dir(&start_name))?;

    let mut solver = PisoSolver::new(
        mesh,
        p,
        u,
        phi,
        transport,
        turbulence,
        driving_force,
        fv.piso.p_ref_cell,
        fv.piso.p_ref_value,
    )?;

    let mut time = Time::new(&ctrl, start_value);
    log::info!("Starting time loop");

    while time.advance() {
        log::info!("Time = {}", time.name());
        let stamp = Instant::now();

        // Control refresh: the solution dictionary is re-read every step so
        // corrector counts and tolerances stay live-tunable.
        let fv = case.fv_solution()?;
        solver.step(time.dt, &fv.piso, &fv.solvers)?;

        time.add_exec(stamp.elapsed());

        if time.output_step() {
            let name = time.name();
            case.write_scalar_field(&name, "p", &solver.p)?;
            case.write_vector_field(&name, "U", &solver.u)?;
            let phi = crate::solver::fields::ScalarField::from_values(solver.phi.clone());
            case.write_scalar_field(&name, "phi", &phi)?;
            solver.driving_force.store(&case.time_dir(&name));
        }

        log::info!(
            "ExecutionTime = {:.2} s  ClockTime = {:.0} s",
            time.exec_seconds(),
            time.clock_seconds()
        );
    }

    log::info!("End");
    Ok(())
}
