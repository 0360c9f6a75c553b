use clap::Parser;
use ctv3_decile_trends::{
    header, join_concept_descriptions, process_df, CodeDictionary, Codelist, ConceptTable,
    Config, FrequencyRow,
};
use qu::ick_use::*;
use std::path::PathBuf;

/// Describe and categorize every code in a frequency extract, writing a codelist.
#[derive(Parser)]
struct Opt {
    /// The code frequency extract (`first_digits,events,patients`).
    frequencies: PathBuf,
    /// Where to write the codelist.
    #[clap(long, short)]
    output: PathBuf,
    /// Only keep codes with this many characters (e.g. 2 for the high level list).
    #[clap(long)]
    digits: Option<usize>,
    #[clap(long, default_value = "topics.toml")]
    config: PathBuf,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let config = Config::load(&opt.config)?;
    let study = &config.study;
    let dictionary = CodeDictionary::load(study.code_dictionary_path())?;
    let [level1, level2, level3] = study.concept_paths();
    let level1 = ConceptTable::load(level1, &dictionary)?;
    let level2 = ConceptTable::load(level2, &dictionary)?;
    let level3 = ConceptTable::load(level3, &dictionary)?;

    let mut frequencies = FrequencyRow::load_csv(&opt.frequencies)?;
    if let Some(digits) = opt.digits {
        frequencies.retain(|row| row.code.len() == digits);
        event!(
            Level::INFO,
            "{} codes with {} characters",
            frequencies.len(),
            digits
        );
    }

    let processed = process_df(&frequencies, &dictionary);
    let mut rows = join_concept_descriptions(&processed, &level1, &level2, &level3);
    rows.sort_by(|a, b| b.events_mill.total_cmp(&a.events_mill));
    let codelist = Codelist::new(rows);
    codelist.save(&opt.output)?;

    header("Categories");
    for category in codelist.categories(&[]) {
        println!(
            "{}: {} codes, {}m events",
            category.name, category.codes, category.events_mill
        );
    }
    event!(
        Level::INFO,
        "wrote {} codes to \"{}\"",
        codelist.len(),
        opt.output.display()
    );
    Ok(())
}
