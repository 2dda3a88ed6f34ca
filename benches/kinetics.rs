//! Benchmarks for channel kinetics sweeps and single-cell simulation.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use celltune::compute::{
    ChannelAnalyzer, GateDynamics, GateKinetics, NativeRunner, RateForm, SimulationRunner,
};
use celltune::compute::{CellModel, MembraneChannel, Stimulus};
use celltune::schema::SimulationSettings;

fn activation_gate() -> GateKinetics {
    GateKinetics {
        name: "n".into(),
        instances: 4,
        dynamics: GateDynamics::Rates {
            forward: RateForm::ExpLinear {
                rate: 0.1,
                midpoint: -55.0,
                scale: 10.0,
            },
            reverse: RateForm::Exp {
                rate: 0.125,
                midpoint: -65.0,
                scale: -80.0,
            },
        },
        q10: None,
    }
}

fn expression_gate() -> GateKinetics {
    GateKinetics {
        name: "n".into(),
        instances: 4,
        dynamics: GateDynamics::Rates {
            forward: RateForm::Expression {
                text: "0.1 * (v + 55) / (1 - exp(-(v + 55) / 10))".into(),
            },
            reverse: RateForm::Expression {
                text: "0.125 * exp(-(v + 65) / 80)".into(),
            },
        },
        q10: None,
    }
}

fn hh_model() -> CellModel {
    CellModel {
        population: "pop0".into(),
        capacitance: 1.0,
        leak_conductance: 0.3,
        leak_reversal: -54.4,
        initial_voltage: -65.0,
        temperature: 6.3,
        ca_conc: 5e-5,
        channels: vec![
            MembraneChannel {
                id: "naChans".into(),
                density: 120.0,
                erev: 50.0,
                gates: vec![
                    GateKinetics {
                        name: "m".into(),
                        instances: 3,
                        dynamics: GateDynamics::Rates {
                            forward: RateForm::ExpLinear {
                                rate: 1.0,
                                midpoint: -40.0,
                                scale: 10.0,
                            },
                            reverse: RateForm::Exp {
                                rate: 4.0,
                                midpoint: -65.0,
                                scale: -18.0,
                            },
                        },
                        q10: None,
                    },
                    GateKinetics {
                        name: "h".into(),
                        instances: 1,
                        dynamics: GateDynamics::Rates {
                            forward: RateForm::Exp {
                                rate: 0.07,
                                midpoint: -65.0,
                                scale: -20.0,
                            },
                            reverse: RateForm::Sigmoid {
                                rate: 1.0,
                                midpoint: -35.0,
                                scale: 10.0,
                            },
                        },
                        q10: None,
                    },
                ],
            },
            MembraneChannel {
                id: "kChans".into(),
                density: 36.0,
                erev: -77.0,
                gates: vec![activation_gate()],
            },
        ],
        stimulus: Stimulus {
            amplitude: 10.0,
            delay_ms: 50.0,
            duration_ms: 400.0,
        },
    }
}

fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");

    for (label, gate) in [
        ("closed_form", activation_gate()),
        ("expression", expression_gate()),
    ] {
        let mut analyzer = ChannelAnalyzer::new(6.3, 5e-5);
        group.bench_with_input(BenchmarkId::from_parameter(label), &gate, |b, gate| {
            b.iter(|| analyzer.sweep(black_box(gate), -100.0, 40.0, 0.1).unwrap());
        });
    }

    group.finish();
}

fn bench_simulation(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulation");
    let model = hh_model();

    for duration_ms in [100.0, 500.0] {
        let settings = SimulationSettings {
            duration_ms,
            dt_ms: 0.025,
            analysis_start_ms: 0.0,
            generation_timeout_ms: None,
        };
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{duration_ms}ms")),
            &settings,
            |b, settings| {
                b.iter(|| NativeRunner.run(black_box(&model), settings, None).unwrap());
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_sweep, bench_simulation);
criterion_main!(benches);
