// S-57 Dump
// Prints every feature of an S-57 cell as one GeoJSON object per line

use std::sync::Arc;

use vortexnav_s57::s57::{ClassCatalog, ReaderOptions, S57Error, S57Reader};

fn run() -> Result<(), S57Error> {
    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: s57_dump <cell.000> [OPTION=VALUE ...]");
        std::process::exit(2);
    };
    let option_pairs: Vec<String> = args.collect();
    let options = ReaderOptions::from_pairs(&option_pairs)?;

    let catalog = match ClassCatalog::load_from_env() {
        Ok(catalog) => catalog,
        Err(e) => {
            log::warn!("Using built-in object class tables: {}", e);
            ClassCatalog::builtin()?
        }
    };

    let mut reader = S57Reader::open(&path, options, Some(Arc::new(catalog)))?;
    reader.ingest()?;
    log::info!(
        "Dataset {} ({} feature records)",
        reader.dataset_name(),
        reader.feature_index().len()
    );

    for feature in reader.features() {
        println!("{}", feature?.to_geojson());
    }

    if let Some([min_x, min_y, max_x, max_y]) = reader.get_extent(true)? {
        log::info!("Extent: {} {} {} {}", min_x, min_y, max_x, max_y);
    }
    Ok(())
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        log::error!("{}", e);
        eprintln!("s57_dump: {}", e);
        std::process::exit(1);
    }
}
