
use indexmap::IndexMap;
use wdfit::{
    build_passband_set, LikelihoodConfig, ObservationBundle, ParameterVector, Photometry,
    PhotometryPoint, Posterior, Spectroscopy, WdFitError,
};

fn fixed_params(teff: f64, logg: f64, ebv: f64, scale: f64, fwhm: f64) -> ParameterVector {
    let mut pv = ParameterVector::default();
    for (name, value) in [
        ("teff", teff),
        ("logg", logg),
        ("ebv", ebv),
        ("scale", scale),
        ("fwhm", fwhm),
    ] {
        let p = pv.get_mut(name).unwrap();
        p.value = value;
        p.fixed = true;
    }
    pv
}

#[test]
fn prior_rejects_out_of_bounds_parameters_regardless_of_data() {
    let grid = synthetic::make_flat_grid(
        &[10000.0, 20000.0, 30000.0],
        &[7.0, 8.0, 9.0],
        4000.0,
        6000.0,
        10.0,
    );
    let obs = synthetic::flat_observation(1.0, 0.01, 50, 7);
    let passbands = IndexMap::new();
    let params = ParameterVector::default();
    let posterior = Posterior::new(
        &grid,
        &obs,
        &passbands,
        params.clone(),
        LikelihoodConfig::default(),
    )
    .unwrap();

    // teff below its lower bound
    let mut pv = params.clone();
    pv.get_mut("teff").unwrap().value = 1000.0;
    assert_eq!(posterior.log_prior(&pv), f64::NEG_INFINITY);
    assert_eq!(posterior.log_posterior(&pv).unwrap(), f64::NEG_INFINITY);

    // logg above its upper bound
    let mut pv = params.clone();
    pv.get_mut("logg").unwrap().value = 11.0;
    assert_eq!(posterior.log_posterior(&pv).unwrap(), f64::NEG_INFINITY);

    // in bounds: finite
    let mut pv = params.clone();
    pv.get_mut("teff").unwrap().value = 20000.0;
    pv.get_mut("ebv").unwrap().value = 0.0;
    assert!(posterior.log_posterior(&pv).unwrap().is_finite());
}

#[test]
fn non_positive_scale_rejects_without_raising() {
    let grid = synthetic::make_flat_grid(&[10000.0, 30000.0], &[7.0, 9.0], 4000.0, 6000.0, 10.0);
    let obs = synthetic::flat_observation(1.0, 0.01, 50, 11);
    let passbands = IndexMap::new();

    let mut params = ParameterVector::default();
    // widen the bounds so the hard physicality guard is what rejects
    params.get_mut("scale").unwrap().bounds = (-10.0, 100.0);
    let posterior = Posterior::new(
        &grid,
        &obs,
        &passbands,
        params.clone(),
        LikelihoodConfig::default(),
    )
    .unwrap();

    for bad in [0.0, -1.0, f64::NAN] {
        let mut pv = params.clone();
        pv.get_mut("scale").unwrap().value = bad;
        assert_eq!(
            posterior.log_posterior(&pv).unwrap(),
            f64::NEG_INFINITY,
            "scale = {bad} must reject"
        );
    }
}

#[test]
fn off_grid_query_rejects_instead_of_erroring() {
    // prior bounds wider than the grid: a proposal can be in-bounds but
    // off-grid, which must be a rejection rather than an error
    let grid = synthetic::make_flat_grid(&[20000.0, 30000.0], &[7.5, 8.5], 4000.0, 6000.0, 10.0);
    let obs = synthetic::flat_observation(1.0, 0.01, 50, 13);
    let passbands = IndexMap::new();
    let params = ParameterVector::default();
    let posterior = Posterior::new(
        &grid,
        &obs,
        &passbands,
        params.clone(),
        LikelihoodConfig::default(),
    )
    .unwrap();

    let mut pv = params.clone();
    pv.get_mut("teff").unwrap().value = 50000.0; // in prior bounds, off grid
    assert_eq!(posterior.log_posterior(&pv).unwrap(), f64::NEG_INFINITY);
}

#[test]
fn perfect_model_reaches_the_gaussian_normalization_ceiling() {
    let grid = synthetic::make_flat_grid(&[10000.0, 30000.0], &[7.0, 9.0], 3500.0, 7000.0, 10.0);
    let sigma = 0.05;
    let n = 80;
    let wave: Vec<f64> = (0..n).map(|i| 4000.0 + i as f64 * 25.0).collect();
    let flux = vec![2.0; n];
    let obs = ObservationBundle::SpectroscopyOnly(
        Spectroscopy::new(wave, flux, vec![sigma; n]).unwrap(),
    );
    let passbands = IndexMap::new();

    // scale 2.0 on a unit flat grid reproduces the data exactly
    let params = fixed_params(20000.0, 8.0, 0.0, 2.0, 1.0);
    let mut free = params.clone();
    free.get_mut("scale").unwrap().fixed = false;
    free.get_mut("scale").unwrap().bounds = (1e-6, 100.0);

    let posterior =
        Posterior::new(&grid, &obs, &passbands, free, LikelihoodConfig::default()).unwrap();

    let expected = -0.5 * n as f64 * (2.0 * std::f64::consts::PI * sigma * sigma).ln();
    let pv = posterior.template().with_free_values(&[2.0]).unwrap();
    let lnlike = posterior.log_likelihood(&pv).unwrap();
    assert!(
        (lnlike - expected).abs() < 1e-9,
        "chi^2 of a perfect model should vanish: {lnlike} vs {expected}"
    );

    // any other scale is worse
    let worse = posterior
        .log_likelihood(&posterior.template().with_free_values(&[2.1]).unwrap())
        .unwrap();
    assert!(worse < lnlike);
}

#[test]
fn photometric_likelihood_peaks_at_matching_magnitudes() {
    let grid = synthetic::make_flat_grid(&[10000.0, 30000.0], &[7.0, 9.0], 3500.0, 7000.0, 10.0);
    let pb = synthetic::tophat_passband("g", 4000.0, 5000.0);
    let synth_at_scale_one = pb.synthetic_mag(
        grid.wave.as_slice().unwrap(),
        &vec![1.0; grid.wave.len()],
    );

    let obs = ObservationBundle::PhotometryOnly(
        Photometry::new(vec![PhotometryPoint {
            passband: "g".to_string(),
            mag: synth_at_scale_one,
            mag_err: 0.02,
        }])
        .unwrap(),
    );
    let passbands = build_passband_set(vec![pb], &[]);

    let mut params = fixed_params(20000.0, 8.0, 0.0, 1.0, 1.0);
    params.get_mut("scale").unwrap().fixed = false;
    params.get_mut("scale").unwrap().bounds = (1e-6, 100.0);
    let config = LikelihoodConfig {
        ascale: 0.01,
        ..LikelihoodConfig::default()
    };
    let posterior = Posterior::new(&grid, &obs, &passbands, params, config).unwrap();

    let at_match = posterior
        .log_likelihood(&posterior.template().with_free_values(&[1.0]).unwrap())
        .unwrap();
    let brighter = posterior
        .log_likelihood(&posterior.template().with_free_values(&[1.5]).unwrap())
        .unwrap();
    let fainter = posterior
        .log_likelihood(&posterior.template().with_free_values(&[0.7]).unwrap())
        .unwrap();
    assert!(at_match > brighter);
    assert!(at_match > fainter);

    // the matching point reaches the normalization ceiling exactly
    let var: f64 = 0.02 * 0.02 + 0.01 * 0.01;
    let expected = -0.5 * (2.0 * std::f64::consts::PI * var).ln();
    assert!((at_match - expected).abs() < 1e-9);
}

#[test]
fn missing_passband_is_a_fatal_setup_error() {
    let grid = synthetic::make_flat_grid(&[10000.0, 30000.0], &[7.0, 9.0], 4000.0, 6000.0, 10.0);
    let obs = ObservationBundle::PhotometryOnly(
        Photometry::new(vec![PhotometryPoint {
            passband: "z".to_string(),
            mag: 20.0,
            mag_err: 0.05,
        }])
        .unwrap(),
    );
    let passbands = build_passband_set(vec![synthetic::tophat_passband("g", 4000.0, 5000.0)], &[]);

    let err = Posterior::new(
        &grid,
        &obs,
        &passbands,
        ParameterVector::default(),
        LikelihoodConfig::default(),
    );
    assert!(matches!(err, Err(WdFitError::Config(_))));
}

#[test]
fn masking_every_pixel_is_a_fatal_setup_error() {
    let grid = synthetic::make_flat_grid(&[10000.0, 30000.0], &[7.0, 9.0], 3500.0, 7000.0, 10.0);
    let wave: Vec<f64> = (0..50).map(|i| 4000.0 + i as f64 * 20.0).collect();
    let spec = Spectroscopy::new(wave, vec![1.0; 50], vec![0.1; 50])
        .unwrap()
        .with_line_masks(vec![(0.0, 1e6)]);
    let obs = ObservationBundle::SpectroscopyOnly(spec);
    let passbands = IndexMap::new();

    let config = LikelihoodConfig {
        mask_lines: true,
        ..LikelihoodConfig::default()
    };
    let err = Posterior::new(
        &grid,
        &obs,
        &passbands,
        ParameterVector::default(),
        config,
    );
    assert!(matches!(err, Err(WdFitError::Config(_))));
}

#[test]
fn line_masks_change_the_pixel_selection() {
    // a biased region hidden under a mask should not pull the likelihood
    let grid = synthetic::make_model_grid(
        &[10000.0, 20000.0, 30000.0],
        &[7.0, 8.0, 9.0],
        3500.0,
        7500.0,
        5.0,
    );
    let wave: Vec<f64> = (0..200).map(|i| 4000.0 + i as f64 * 15.0).collect();
    let truth: Vec<f64> = wave
        .iter()
        .map(|&w| synthetic::model_flux(w, 20000.0, 8.0))
        .collect();
    // corrupt the line core
    let corrupted: Vec<f64> = wave
        .iter()
        .zip(&truth)
        .map(|(&w, &f)| if (6400.0..6700.0).contains(&w) { f * 3.0 } else { f })
        .collect();
    let spec = Spectroscopy::new(wave, corrupted, vec![0.01; 200])
        .unwrap()
        .with_line_masks(vec![(6400.0, 6700.0)]);
    let obs = ObservationBundle::SpectroscopyOnly(spec);
    let passbands = IndexMap::new();

    let params = fixed_params(20000.0, 8.0, 0.0, 1.0, 1e-9);
    let mut free = params.clone();
    free.get_mut("fwhm").unwrap().fixed = false;
    free.get_mut("fwhm").unwrap().bounds = (1e-12, 50.0);

    let masked = Posterior::new(
        &grid,
        &obs,
        &passbands,
        free.clone(),
        LikelihoodConfig {
            mask_lines: true,
            ..LikelihoodConfig::default()
        },
    )
    .unwrap();
    let unmasked = Posterior::new(
        &grid,
        &obs,
        &passbands,
        free,
        LikelihoodConfig::default(),
    )
    .unwrap();

    let pv = masked.template().with_free_values(&[1e-9]).unwrap();
    let with_mask = masked.log_likelihood(&pv).unwrap();
    let without_mask = unmasked.log_likelihood(&pv).unwrap();
    // the corrupted pixels hammer the unmasked chi^2
    assert!(with_mask > without_mask + 100.0);
}
