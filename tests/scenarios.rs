use approx::assert_relative_eq;
use std::ops::RangeInclusive;

use stockflow::{
    Config, DimArray, Dimension, DimensionSet, DynamicModel, Flow, InitialStock, LifetimeKind,
    LifetimeModel, MfaCompute, MfaError, MfaResult, MfaSystem, Process, ProcessId, SolveOutcome,
    Stock, StockKind, TimeAxis,
};

fn years(range: RangeInclusive<i32>) -> Dimension {
    Dimension::new("time", 't', range).unwrap()
}

fn processes(names: &[&str]) -> Vec<Process> {
    names.iter().enumerate().map(|(i, n)| Process::new(ProcessId(i), n)).collect()
}

fn fixed_lifetime(dims: DimensionSet, years: f64) -> LifetimeModel {
    LifetimeModel::new(LifetimeKind::Fixed, dims, 't')
        .unwrap()
        .with_parameter("mean", &DimArray::scalar(years))
        .unwrap()
}

#[test]
fn flow_driven_stock_accumulates_net_inflow() {
    let product = Dimension::new("product", 'p', ["World"]).unwrap();
    let dims = DimensionSet::new(vec![years(2000..=2010), product]).unwrap();
    let mut stock = Stock::new("stock", dims.clone(), StockKind::FlowDriven).unwrap();
    stock.inflow.set_from(&DimArray::full(dims.clone(), 0.1)).unwrap();
    stock.outflow.set_from(&DimArray::full(dims, 0.01)).unwrap();
    stock.compute(&Config::default()).unwrap();

    assert_relative_eq!(stock.stock.value(&[10, 0]).unwrap(), 0.99, epsilon = 1e-12);
    assert_relative_eq!(stock.stock.value(&[0, 0]).unwrap(), 0.09, epsilon = 1e-12);
}

#[test]
fn uneven_time_steps() {
    let time = TimeAxis::new(vec![2000.0, 2005.0, 2010.0, 2020.0, 2030.0]).unwrap();
    assert_eq!(time.interval_lengths(), &[5.0, 5.0, 7.5, 10.0, 10.0]);
}

#[test]
fn share_and_remainder_close_the_balance() {
    let dims = DimensionSet::new(vec![years(2020..=2020)]).unwrap();
    let processes = processes(&["sysenv", "sorting", "landfill"]);
    let mut system = MfaSystem::new(dims.clone(), processes, Config::default()).unwrap();
    system.add_flow(Flow::new("in", dims.clone(), ProcessId(0), ProcessId(1))).unwrap();
    system.add_flow(Flow::new("a", dims.clone(), ProcessId(1), ProcessId(0))).unwrap();
    system.add_flow(Flow::new("b", dims.clone(), ProcessId(1), ProcessId(2))).unwrap();
    system.flow_mut("in").unwrap().fill(10.0);
    system.process_mut("sorting").unwrap().set_share("a", DimArray::scalar(0.5));

    let outcome = system.compute_process("sorting").unwrap();
    assert_eq!(outcome, SolveOutcome::Computed { overdetermined: false });
    assert_eq!(system.flow("a").unwrap().to_vec(), vec![5.0]);
    assert_eq!(system.flow("b").unwrap().to_vec(), vec![5.0]);
}

#[test]
fn single_outflow_with_half_share_violates_balance() {
    let dims = DimensionSet::new(vec![years(2020..=2020)]).unwrap();
    let processes = processes(&["sysenv", "sorting"]);
    let mut system = MfaSystem::new(dims.clone(), processes, Config::default()).unwrap();
    system.add_flow(Flow::new("in", dims.clone(), ProcessId(0), ProcessId(1))).unwrap();
    system.add_flow(Flow::new("a", dims.clone(), ProcessId(1), ProcessId(0))).unwrap();
    system.flow_mut("in").unwrap().fill(10.0);
    system.process_mut("sorting").unwrap().set_share("a", DimArray::scalar(0.5));

    assert!(matches!(system.compute_process("sorting"), Err(MfaError::MassBalance { .. })));
}

/// sysenv -> production -> use (in-use stock) -> sysenv
struct VehicleFleet {
    system: MfaSystem,
}

impl VehicleFleet {
    fn new() -> MfaResult<Self> {
        let region = Dimension::new("region", 'r', ["EU", "US"])?;
        let dims = DimensionSet::new(vec![years(2000..=2030), region])?;
        let processes = processes(&["sysenv", "production", "use"]);
        let mut system = MfaSystem::new(dims.clone(), processes, Config::default())?;
        for (name, from, to) in
            [("sysenv => production", 0, 1), ("production => use", 1, 2), ("use => sysenv", 2, 0)]
        {
            system.add_flow(Flow::new(name, dims.clone(), ProcessId(from), ProcessId(to)))?;
        }

        let lifetime = LifetimeModel::new(LifetimeKind::Normal, dims.clone(), 't')?
            .with_parameter("mean", &DimArray::scalar(12.0))?
            .with_parameter("std", &DimArray::scalar(3.0))?;
        let kind = StockKind::InflowDriven(DynamicModel::new(lifetime));
        let stock = Stock::new("in_use", dims, kind)?.with_process(ProcessId(2));
        system.add_stock(stock)?;
        Ok(VehicleFleet { system })
    }
}

impl MfaCompute for VehicleFleet {
    fn system(&self) -> &MfaSystem {
        &self.system
    }

    fn system_mut(&mut self) -> &mut MfaSystem {
        &mut self.system
    }

    fn compute(&mut self) -> MfaResult<()> {
        self.system.flow_mut("sysenv => production")?.fill(3.0);
        let left = self.system.compute_recursive("production")?;
        assert!(left.is_empty());
        Ok(())
    }
}

#[test]
fn inflow_driven_stock_drives_its_process() {
    let mut fleet = VehicleFleet::new().unwrap();
    fleet.run().unwrap();

    let system = fleet.system();
    let stock = system.stock("in_use").unwrap();
    assert!(stock.is_computed());
    assert_eq!(stock.inflow.to_vec(), system.flow("production => use").unwrap().to_vec());
    assert_eq!(stock.outflow.to_vec(), system.flow("use => sysenv").unwrap().to_vec());
    // nothing leaves before the first cohorts age
    assert_relative_eq!(stock.outflow.value(&[0, 0]).unwrap(), 0.0, epsilon = 1e-3);
    // stock saturates towards inflow * mean lifetime
    assert_relative_eq!(stock.stock.value(&[30, 1]).unwrap(), 36.0, max_relative = 0.05);
}

/// sysenv -> use (in-use stock) -> sysenv, flows named `in` and `out`
fn use_phase(span: RangeInclusive<i32>, kind: impl FnOnce(DimensionSet) -> StockKind) -> MfaSystem {
    let dims = DimensionSet::new(vec![years(span)]).unwrap();
    let processes = processes(&["sysenv", "use"]);
    let mut system = MfaSystem::new(dims.clone(), processes, Config::default()).unwrap();
    system.add_flow(Flow::new("in", dims.clone(), ProcessId(0), ProcessId(1))).unwrap();
    system.add_flow(Flow::new("out", dims.clone(), ProcessId(1), ProcessId(0))).unwrap();
    let stock = Stock::new("in_use", dims.clone(), kind(dims)).unwrap().with_process(ProcessId(1));
    system.add_stock(stock).unwrap();
    system
}

#[test]
fn stock_driven_stock_determines_both_sides() {
    let mut system = use_phase(2000..=2004, |dims| {
        StockKind::StockDriven(DynamicModel::new(fixed_lifetime(dims, 2.0)))
    });
    let levels = DimArray::from_vec(system.dims().clone(), vec![1.0, 2.0, 3.0, 3.0, 3.0]).unwrap();
    system.stock_mut("in_use").unwrap().stock.set_from(&levels).unwrap();

    system.compute_process("use").unwrap();
    let stock = system.stock("in_use").unwrap();
    assert_eq!(system.flow("in").unwrap().to_vec(), stock.inflow.to_vec());
    assert_eq!(system.flow("out").unwrap().to_vec(), stock.outflow.to_vec());
    assert_eq!(stock.inflow.to_vec(), vec![1.0, 1.0, 2.0, 1.0, 2.0]);
    system.check_mass_balance().unwrap();
}

#[test]
fn flow_driven_stock_takes_both_sides() {
    let mut system = use_phase(2000..=2004, |_| StockKind::FlowDriven);
    system.flow_mut("in").unwrap().fill(2.0);
    system.flow_mut("out").unwrap().fill(1.0);

    let outcome = system.compute_process("use").unwrap();
    assert!(outcome.is_computed());
    assert_eq!(system.stock("in_use").unwrap().stock.to_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
}

#[test]
fn flow_driven_stock_without_outflows_keeps_everything() {
    let dims = DimensionSet::new(vec![years(2000..=2002)]).unwrap();
    let processes = processes(&["sysenv", "landfill"]);
    let mut system = MfaSystem::new(dims.clone(), processes, Config::default()).unwrap();
    system.add_flow(Flow::new("waste", dims.clone(), ProcessId(0), ProcessId(1))).unwrap();
    let stock = Stock::new("deposit", dims, StockKind::FlowDriven)
        .unwrap()
        .with_process(ProcessId(1));
    system.add_stock(stock).unwrap();
    system.flow_mut("waste").unwrap().fill(4.0);

    system.compute_process("landfill").unwrap();
    assert_eq!(system.stock("deposit").unwrap().stock.to_vec(), vec![4.0, 8.0, 12.0]);
}

#[test]
fn flexible_stock_follows_whatever_is_given() {
    let flexible =
        |dims: DimensionSet| StockKind::Flexible(DynamicModel::new(fixed_lifetime(dims, 2.0)));

    // known inflow: inflow-driven
    let mut system = use_phase(2000..=2004, flexible);
    system.flow_mut("in").unwrap().fill(1.0);
    system.compute_process("use").unwrap();
    let stock = system.stock("in_use").unwrap();
    assert_eq!(stock.stock.to_vec(), vec![1.0, 2.0, 2.0, 2.0, 2.0]);
    assert_eq!(system.flow("out").unwrap().to_vec(), vec![0.0, 0.0, 1.0, 1.0, 1.0]);
    system.check_mass_balance().unwrap();

    // prescribed stock: stock-driven
    let mut system = use_phase(2000..=2004, flexible);
    let levels = DimArray::from_vec(system.dims().clone(), vec![1.0, 2.0, 3.0, 3.0, 3.0]).unwrap();
    system.stock_mut("in_use").unwrap().stock.set_from(&levels).unwrap();
    system.compute_process("use").unwrap();
    assert_eq!(system.flow("in").unwrap().to_vec(), vec![1.0, 1.0, 2.0, 1.0, 2.0]);
    system.check_mass_balance().unwrap();
}

#[test]
fn seeded_history_stays_out_of_the_inflows() {
    let mut system = use_phase(2000..=2005, |dims| {
        let by_cohort = vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0];
        let snapshot = DimArray::from_vec(dims.clone(), by_cohort).unwrap();
        let model = DynamicModel::new(fixed_lifetime(dims, 3.0))
            .with_initial_stock(InitialStock::new(2002, snapshot));
        StockKind::InflowByCohortDriven(model)
    });
    let inflow = vec![0.0, 0.0, 0.0, 2.0, 2.0, 2.0];
    let future = DimArray::from_vec(system.dims().clone(), inflow.clone()).unwrap();
    system.flow_mut("in").unwrap().set_from(&future).unwrap();

    let outcome = system.compute_process("use").unwrap();
    assert!(outcome.is_computed());
    let stock = system.stock("in_use").unwrap();
    assert_eq!(stock.inflow.to_vec(), vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
    assert_eq!(stock.process_inflow().unwrap().to_vec(), inflow);
    assert_eq!(stock.stock.to_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert_eq!(system.flow("in").unwrap().to_vec(), inflow);
    assert_eq!(system.flow("out").unwrap().to_vec(), vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
    system.check_mass_balance().unwrap();
}
