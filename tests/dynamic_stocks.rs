use approx::{assert_abs_diff_eq, assert_relative_eq};
use stockflow::{
    Config, DimArray, Dimension, DimensionSet, DynamicModel, InflowAnchor, LifetimeKind,
    LifetimeModel, ProportionalOutflowCorrection, Stock, StockKind, SubIntervalPolicy,
};

fn century() -> DimensionSet {
    DimensionSet::new(vec![Dimension::new("time", 't', 1900..=2100).unwrap()]).unwrap()
}

fn lognormal(dims: DimensionSet, policy: SubIntervalPolicy) -> DynamicModel {
    let lifetime = LifetimeModel::new(LifetimeKind::LogNormal, dims, 't')
        .unwrap()
        .with_policy(policy)
        .unwrap()
        .with_parameter("mean", &DimArray::scalar(60.0))
        .unwrap()
        .with_parameter("std", &DimArray::scalar(25.0))
        .unwrap();
    DynamicModel::new(lifetime)
}

fn logistic_inflow(dims: &DimensionSet) -> DimArray {
    let values = (0..dims.total_size())
        .map(|i| 5.0 + 100.0 / (1.0 + (-(i as f64 - 100.0) / 15.0).exp()))
        .collect();
    DimArray::from_vec(dims.clone(), values).unwrap()
}

fn inverse_round_trip(policy: SubIntervalPolicy) {
    let dims = century();
    let inflow = logistic_inflow(&dims);

    let kind = StockKind::InflowDriven(lognormal(dims.clone(), policy));
    let mut forward = Stock::new("forward", dims.clone(), kind).unwrap();
    forward.inflow.set_from(&inflow).unwrap();
    forward.compute(&Config::default()).unwrap();

    let kind = StockKind::StockDriven(lognormal(dims.clone(), policy));
    let mut backward = Stock::new("backward", dims, kind).unwrap();
    backward.stock.set_from(&forward.stock).unwrap();
    backward.compute(&Config::default()).unwrap();

    for (recovered, original) in backward.inflow.to_vec().iter().zip(inflow.to_vec()) {
        assert_relative_eq!(*recovered, original, max_relative = 1e-9);
    }
    for (recovered, original) in backward.outflow.to_vec().iter().zip(forward.outflow.to_vec()) {
        assert_abs_diff_eq!(*recovered, original, epsilon = 1e-7);
    }
}

#[test]
fn stock_driven_inverts_inflow_driven() {
    inverse_round_trip(SubIntervalPolicy::default());
}

#[test]
fn stock_driven_inverts_inflow_driven_with_sub_intervals() {
    inverse_round_trip(SubIntervalPolicy::Anchor(InflowAnchor::Middle));
    inverse_round_trip(SubIntervalPolicy::Quadrature { n_pts_per_interval: 4 });
}

#[test]
fn dynamic_stocks_close_their_mass_balance() {
    let dims = DimensionSet::new(vec![
        Dimension::new("time", 't', [2000, 2002, 2005, 2010, 2011, 2012]).unwrap(),
        Dimension::new("region", 'r', ["EU", "US", "CN"]).unwrap(),
    ])
    .unwrap();
    let lifetime = LifetimeModel::new(LifetimeKind::Weibull, dims.clone(), 't')
        .unwrap()
        .with_parameter("shape", &DimArray::scalar(2.0))
        .unwrap()
        .with_parameter("scale", &DimArray::scalar(6.0))
        .unwrap();
    let kind = StockKind::InflowDriven(DynamicModel::new(lifetime));
    let mut stock = Stock::new("s", dims.clone(), kind).unwrap();
    stock.inflow.set_from(&DimArray::full(dims, 4.0)).unwrap();
    stock.compute(&Config::default()).unwrap();

    assert!(stock.balance().unwrap().max_abs() < 1e-12);
    let by_cohort = stock.stock_by_cohort().unwrap();
    assert_eq!(by_cohort.shape(), &[6, 6, 3]);
    // the stock is the sum over cohorts
    let summed = by_cohort.slice(ndarray::s![3, .., 1]).sum();
    assert_abs_diff_eq!(summed, stock.stock.value(&[3, 1]).unwrap(), epsilon = 1e-12);
}

#[test]
fn shrinking_stock_with_outflow_correction() {
    let dims = DimensionSet::new(vec![Dimension::new("time", 't', 2000..=2004).unwrap()]).unwrap();
    let lifetime = LifetimeModel::new(LifetimeKind::Fixed, dims.clone(), 't')
        .unwrap()
        .with_parameter("mean", &DimArray::scalar(10.0))
        .unwrap();
    let prescribed = DimArray::from_vec(dims.clone(), vec![10.0, 10.0, 6.0, 6.0, 8.0]).unwrap();

    let kind = StockKind::StockDriven(DynamicModel::new(lifetime.clone()));
    let mut plain = Stock::new("plain", dims.clone(), kind).unwrap();
    plain.stock.set_from(&prescribed).unwrap();
    plain.compute(&Config::default()).unwrap();
    assert_eq!(plain.inflow.to_vec(), vec![10.0, 0.0, -4.0, 0.0, 2.0]);

    let model = DynamicModel::new(lifetime).with_correction(ProportionalOutflowCorrection);
    let mut corrected = Stock::new("corrected", dims, StockKind::StockDriven(model)).unwrap();
    corrected.stock.set_from(&prescribed).unwrap();
    corrected.compute(&Config::default()).unwrap();

    assert_eq!(corrected.corrected_steps(), &[2]);
    assert!(corrected.inflow.to_vec().iter().all(|v| *v >= 0.0));
    assert_relative_eq!(corrected.outflow.value(&[2]).unwrap(), 4.0, epsilon = 1e-12);
    assert_relative_eq!(corrected.inflow.value(&[4]).unwrap(), 2.0, epsilon = 1e-12);
    for (level, target) in corrected.stock.to_vec().iter().zip(prescribed.to_vec()) {
        assert_relative_eq!(*level, target, epsilon = 1e-12);
    }
}

#[test]
fn flexible_stock_needs_stock_or_inflow() {
    let dims = century();
    let kind = StockKind::Flexible(lognormal(dims.clone(), SubIntervalPolicy::default()));
    let mut stock = Stock::new("s", dims.clone(), kind).unwrap();
    assert!(stock.compute(&Config::default()).is_err());

    stock.inflow.set_from(&logistic_inflow(&dims)).unwrap();
    stock.compute(&Config::default()).unwrap();
    assert!(stock.stock.value(&[200]).unwrap() > 0.0);
}
