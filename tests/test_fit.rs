
use wdfit::fit::{outfile, read_inputs_snapshot};
use wdfit::{run_fit, FitConfig, FitResult, ParameterVector, WdFitError};

fn scale_only_params() -> ParameterVector {
    let mut pv = ParameterVector::default();
    for name in ["teff", "logg", "ebv", "fwhm"] {
        pv.get_mut(name).unwrap().fixed = true;
    }
    pv.get_mut("teff").unwrap().value = 20000.0;
    pv.get_mut("logg").unwrap().value = 8.0;
    pv.get_mut("ebv").unwrap().value = 0.0;
    pv.get_mut("fwhm").unwrap().value = 1.0;
    pv.get_mut("scale").unwrap().value = 1.5;
    pv
}

fn small_config() -> FitConfig {
    FitConfig {
        nwalkers: 10,
        ntemps: 2,
        nburnin: 100,
        nprod: 300,
        swap_every: 5,
        discard: 50,
        quick_fit: false,
        seed: 17,
        ..FitConfig::default()
    }
}

#[test]
fn fit_recovers_scale_and_writes_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let grid = synthetic::make_flat_grid(&[10000.0, 30000.0], &[7.0, 9.0], 3500.0, 7000.0, 10.0);
    let truth = 2.0;
    let obs = synthetic::flat_observation(truth, 0.05, 120, 41);
    let params = scale_only_params();

    let result = run_fit(
        &obs,
        &params,
        &grid,
        vec![],
        &small_config(),
        dir.path(),
        "flatsource",
    )
    .unwrap();

    let est = result.params["scale"];
    assert!(
        (est.value - truth).abs() < 0.05,
        "fitted scale {} should be near {truth}",
        est.value
    );
    assert!(est.errlo > 0.0 && est.errhi > 0.0);
    assert!(result.mean_acceptance > 0.05);
    assert!(result.nsamples > 0);

    // artifacts: inputs snapshot, amended params, result
    let inputs = read_inputs_snapshot(&outfile(dir.path(), "flatsource", "_inputs.bin")).unwrap();
    assert!(inputs.spectroscopy().is_some());

    let amended =
        ParameterVector::read_json(&outfile(dir.path(), "flatsource", "_params.json")).unwrap();
    assert_eq!(amended.value("scale"), Some(est.value));

    let result_file = std::fs::File::open(outfile(dir.path(), "flatsource", "_result.json")).unwrap();
    let restored: FitResult = serde_json::from_reader(result_file).unwrap();
    assert_eq!(restored.nsamples, result.nsamples);
}

#[test]
fn second_run_without_redo_is_a_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let grid = synthetic::make_flat_grid(&[10000.0, 30000.0], &[7.0, 9.0], 3500.0, 7000.0, 10.0);
    let obs = synthetic::flat_observation(2.0, 0.05, 120, 43);
    let params = scale_only_params();
    let config = small_config();

    run_fit(&obs, &params, &grid, vec![], &config, dir.path(), "wd0001").unwrap();

    // identical invocation without redo: conflict, nothing overwritten
    let err = run_fit(&obs, &params, &grid, vec![], &config, dir.path(), "wd0001");
    assert!(matches!(err, Err(WdFitError::OutputExists(_))));

    // explicit redo reruns cleanly
    let config = FitConfig {
        redo: true,
        ..config
    };
    run_fit(&obs, &params, &grid, vec![], &config, dir.path(), "wd0001").unwrap();
}

#[test]
fn quick_fit_seeds_a_two_parameter_problem() {
    let dir = tempfile::tempdir().unwrap();
    let grid = synthetic::make_model_grid(
        &[10000.0, 15000.0, 20000.0, 25000.0, 30000.0],
        &[7.0, 7.5, 8.0, 8.5, 9.0],
        3500.0,
        7500.0,
        10.0,
    );
    let obs = synthetic::model_observation(18000.0, 8.0, 1.0, 0.002, 47);

    let mut params = ParameterVector::default();
    for name in ["logg", "ebv", "fwhm"] {
        params.get_mut(name).unwrap().fixed = true;
    }
    params.get_mut("logg").unwrap().value = 8.0;
    params.get_mut("ebv").unwrap().value = 0.0;
    params.get_mut("fwhm").unwrap().value = 1.0;
    params.get_mut("teff").unwrap().bounds = (10000.0, 30000.0);
    params.get_mut("teff").unwrap().value = 25000.0;
    params.get_mut("scale").unwrap().bounds = (0.1, 10.0);

    let config = FitConfig {
        nwalkers: 10,
        ntemps: 2,
        nburnin: 150,
        nprod: 300,
        swap_every: 5,
        discard: 50,
        quick_fit: true,
        seed: 5,
        ..FitConfig::default()
    };
    let result = run_fit(&obs, &params, &grid, vec![], &config, dir.path(), "wd0002").unwrap();

    let teff = result.params["teff"];
    assert!(
        (teff.value - 18000.0).abs() < 500.0,
        "fitted Teff {} should be near 18000",
        teff.value
    );
    let scale = result.params["scale"];
    assert!(
        (scale.value - 1.0).abs() < 0.05,
        "fitted scale {} should be near 1.0",
        scale.value
    );
}

#[test]
fn photometry_enters_the_fit() {
    let dir = tempfile::tempdir().unwrap();
    let grid = synthetic::make_flat_grid(&[10000.0, 30000.0], &[7.0, 9.0], 3500.0, 7000.0, 10.0);

    let pb = synthetic::tophat_passband("g", 4000.0, 5000.0);
    // magnitude of a flat spectrum at scale 2: zp - 2.5 log10(2)
    let truth_mag = 25.0 - 2.5 * 2.0_f64.log10();
    let spec = match synthetic::flat_observation(2.0, 0.05, 120, 53) {
        wdfit::ObservationBundle::SpectroscopyOnly(s) => s,
        _ => unreachable!(),
    };
    let obs = wdfit::ObservationBundle::Combined {
        spectroscopy: spec,
        photometry: wdfit::Photometry::new(vec![wdfit::PhotometryPoint {
            passband: "g".to_string(),
            mag: truth_mag,
            mag_err: 0.02,
        }])
        .unwrap(),
    };

    let config = FitConfig {
        ascale: 0.01,
        ..small_config()
    };
    let result = run_fit(
        &obs,
        &scale_only_params(),
        &grid,
        vec![pb],
        &config,
        dir.path(),
        "wd0003",
    )
    .unwrap();

    let est = result.params["scale"];
    assert!(
        (est.value - 2.0).abs() < 0.05,
        "fitted scale {} should be near 2.0",
        est.value
    );
}

#[test]
fn excluded_passband_fails_setup_when_photometry_needs_it() {
    let dir = tempfile::tempdir().unwrap();
    let grid = synthetic::make_flat_grid(&[10000.0, 30000.0], &[7.0, 9.0], 3500.0, 7000.0, 10.0);
    let pb = synthetic::tophat_passband("g", 4000.0, 5000.0);
    let obs = wdfit::ObservationBundle::PhotometryOnly(
        wdfit::Photometry::new(vec![wdfit::PhotometryPoint {
            passband: "g".to_string(),
            mag: 24.0,
            mag_err: 0.02,
        }])
        .unwrap(),
    );

    let config = FitConfig {
        excludepb: vec!["g".to_string()],
        ..small_config()
    };
    let err = run_fit(
        &obs,
        &scale_only_params(),
        &grid,
        vec![pb],
        &config,
        dir.path(),
        "wd0004",
    );
    assert!(matches!(err, Err(WdFitError::Config(_))));
}
