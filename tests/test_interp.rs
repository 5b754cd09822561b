use wdfit::AkimaSpline;

#[test]
fn akima_is_exact_at_every_node() {
    let xs: Vec<f64> = (0..40).map(|i| 3000.0 + 25.0 * i as f64).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| 1.0 - 0.4 * (-0.5 * ((x - 3500.0) / 60.0_f64).powi(2)).exp())
        .collect();
    let spline = AkimaSpline::new(xs.clone(), ys.clone());
    for (x, y) in xs.iter().zip(&ys) {
        let v = spline.evaluate(*x);
        assert!(
            (v - y).abs() < 1e-12,
            "Akima({x}) = {v}, expected {y}"
        );
    }
}

#[test]
fn akima_tracks_a_smooth_absorption_line() {
    // coarse samples of a Gaussian line, evaluated at finer spacing
    let xs: Vec<f64> = (0..=120).map(|i| 6000.0 + 10.0 * i as f64).collect();
    let line = |x: f64| 1.0 - 0.5 * (-0.5 * ((x - 6563.0) / 40.0_f64).powi(2)).exp();
    let ys: Vec<f64> = xs.iter().map(|&x| line(x)).collect();
    let spline = AkimaSpline::new(xs, ys);

    for i in 0..=1100 {
        let x = 6050.0 + i as f64;
        let v = spline.evaluate(x);
        assert!(
            (v - line(x)).abs() < 5e-3,
            "Akima({x}) = {v}, expected {}",
            line(x)
        );
    }
}

#[test]
fn akima_does_not_overshoot_sharp_features() {
    // flat spectrum with one deep, narrow line: the interpolant should not
    // swing outside the data range the way a natural cubic spline does
    let xs: Vec<f64> = (0..=20).map(|i| i as f64).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| if (9.0..=11.0).contains(&x) { 0.1 } else { 1.0 })
        .collect();
    let spline = AkimaSpline::new(xs, ys);

    for i in 0..=2000 {
        let x = i as f64 * 0.01;
        let v = spline.evaluate(x);
        assert!(
            (0.0..=1.1).contains(&v),
            "interpolant overshoots at x={x}: {v}"
        );
    }
}
