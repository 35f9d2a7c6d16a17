use picketfence::{EpidImage, MlcArrangement, MlcPreset, PicketFence, PixelSpacing};
use std::error::Error;
use std::path::Path;

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        eprintln!(
            "Usage: {} <image.tif> <pixel_size_mm> <mlc_preset> [out.json]",
            args[0]
        );
        std::process::exit(2);
    }

    let pixel_size_mm: f64 = args[2].parse()?;
    let image = image::open(Path::new(&args[1]))?;
    let epid = EpidImage::from_dynamic(&image, PixelSpacing::isotropic(pixel_size_mm))?;
    let preset: MlcPreset = args[3].parse()?;

    let analyzer = PicketFence::new(MlcArrangement::preset(preset));
    let result = analyzer.analyze(&[epid])?;

    println!("{}", result.text_summary());
    println!(
        "{} pickets, {} leaf pairs measured, {} dropped.",
        result.pickets.len(),
        result.n_measured_leaf_pairs,
        result.dropped_pickets.len()
    );

    if let Some(out_path) = args.get(4) {
        let json = serde_json::to_string_pretty(&result)?;
        std::fs::write(out_path, json)?;
        println!("Wrote {out_path}");
    }
    Ok(())
}
