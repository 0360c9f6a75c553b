use clap::Parser;
use ctv3_decile_trends::{
    codelist::load_filter_codelists, header, parse_date, CodeDictionary, Codelist, Config,
    report::ChartOptions, DecileTable, LocalStore, StudyConfig, TopicReport,
};
use qu::ick_use::*;
use std::{io, path::PathBuf};

/// Chart and classify the activity for one topic's codes.
#[derive(Parser)]
struct Opt {
    /// The topic to report on, as named in the config file.
    topic: String,
    #[clap(long, default_value = "topics.toml")]
    config: PathBuf,
    /// Override the study end date (`yyyymmdd`).
    #[clap(long)]
    end_date: Option<String>,
    /// Use the activity threshold for dummy data.
    #[clap(long)]
    dummy_data: bool,
    /// The directory containing `extract.csv`, if not the data directory.
    #[clap(long)]
    store: Option<PathBuf>,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let config = Config::load(&opt.config)?;
    let topic = config.topic(&opt.topic)?;
    let mut study = config.study.clone();
    if let Some(end_date) = &opt.end_date {
        study.end_date = parse_date(end_date)
            .with_context(|| format!("invalid end date \"{}\"", end_date))?;
    }
    study.threshold = study.threshold(opt.dummy_data);

    let dictionary = CodeDictionary::load(study.code_dictionary_path())?;
    let store = LocalStore::load(opt.store.as_ref().unwrap_or(&study.data_dir))?;

    let (high_level, detailed) = load_filter_codelists(
        &study.output_dir,
        &study.end_date_stamp(),
        &topic.keywords,
        &topic.concepts,
    )?;
    let high_level = high_level
        .filter(&topic.high_level.filter("High level", study.keyword_exclusion))?
        .with_category(&topic.category);
    let detailed = detailed
        .filter(&topic.detailed.filter("Detailed", study.keyword_exclusion))?
        .with_category(&topic.category);

    header(&format!(
        "Changes occurring in primary care {} activity",
        topic.title
    ));
    let mut renderer = DecileTable;
    let lists = [
        ("High level codes", high_level, topic.high_level_limit, topic.second_chart),
        ("Detailed codes", detailed, topic.detailed_limit, false),
    ];
    for (title, codelist, limit, second_chart) in lists {
        if limit == 0 {
            continue;
        }
        report(
            title,
            &codelist,
            &dictionary,
            limit,
            &study,
            &store,
            &mut renderer,
            second_chart,
        )?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn report(
    title: &str,
    codelist: &Codelist,
    dictionary: &CodeDictionary,
    limit: usize,
    study: &StudyConfig,
    store: &LocalStore,
    renderer: &mut DecileTable,
    second_chart: bool,
) -> Result {
    header(title);
    let report = TopicReport::run(codelist, dictionary, limit, study, store, second_chart)?;
    report.render(&mut io::stdout().lock(), renderer, ChartOptions::default())?;
    let charted = report
        .code_reports()
        .filter(|code| !code.trend.is_insufficient())
        .count();
    event!(
        Level::INFO,
        "{}: {} codes charted, {} too sparse, {} with no data",
        title,
        charted,
        report.code_reports().count() - charted,
        report.no_data.len()
    );
    Ok(())
}
