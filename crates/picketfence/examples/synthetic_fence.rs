use picketfence::synthetic::SyntheticFence;
use picketfence::{AnalysisConfig, Classification, PicketFence};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    let fence = SyntheticFence::evenly_spaced(10, 15.0)
        .with_tilt(0.01)
        .with_noise(8.0, 1)
        .with_leaf_error(3, 25, 0.6)
        .with_leaf_error(7, 40, -0.35);

    let mut config = AnalysisConfig::default();
    config.tolerance_mm = 0.5;
    config.action_tolerance_mm = Some(0.3);

    let result = PicketFence::with_config(config).analyze(&[fence.to_epid()?])?;
    println!("{}", result.text_summary());

    for (picket, v) in result.values() {
        if v.classification != Classification::Pass {
            println!(
                "picket {picket} leaf {:>2} at {:+7.2} mm: error {:+.3} mm ({})",
                v.leaf_index,
                v.measured_position_mm,
                v.error_mm,
                v.classification.name()
            );
        }
    }
    Ok(())
}
