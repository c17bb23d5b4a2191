use anyhow::Result;
use staged_etl::core::RejectPolicy;
use staged_etl::domain::table::{SourceSpec, StorageConfig};
use staged_etl::utils::validation::Validate;
use staged_etl::{MergeScript, PipelineFile};
use tempfile::TempDir;

#[test]
fn test_shipped_config_is_valid() -> Result<()> {
    let pipeline = PipelineFile::from_file("configs/aiq.toml")?;
    pipeline.validate()?;

    assert_eq!(pipeline.pipeline.name, "aiq");
    assert_eq!(pipeline.load.reject_policy(), RejectPolicy::Strict);
    assert_eq!(pipeline.tables.len(), 3);

    let plan = pipeline.plan()?;
    let order: Vec<&str> = plan.ordered().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(order, vec!["sales_order", "customer_and_weather"]);

    let weather = plan.table("weather_details").unwrap();
    assert_eq!(weather.merge_key, vec!["date", "lat", "lon"]);
    assert_eq!(weather.columns.len(), 18);
    match &weather.source {
        SourceSpec::WeatherApi { lookup_table, .. } => assert_eq!(lookup_table, "customer_details"),
        other => panic!("unexpected source: {:?}", other),
    }
    Ok(())
}

#[test]
fn test_sales_script_matches_warehouse_job() -> Result<()> {
    let pipeline = PipelineFile::from_file("configs/aiq.toml")?;
    let plan = pipeline.plan()?;
    let sales = plan.table("sales_order").unwrap();
    let storage = StorageConfig {
        bucket: "aiq-landing".to_string(),
        prefix: "etl/".to_string(),
    };

    let script = MergeScript::for_table(
        sales,
        &sales.object_location(&storage),
        "arn:aws:iam::123456789012:role/RedshiftCopy",
        pipeline.load.reject_policy().max_rejected(),
    )
    .render();

    let lines: Vec<&str> = script.lines().collect();
    assert_eq!(
        lines,
        vec![
            "begin;",
            "truncate table aiq_data_staging.sales_order;",
            "copy aiq_data_staging.sales_order from 's3://aiq-landing/etl/data/sales_data.csv' iam_role 'arn:aws:iam::123456789012:role/RedshiftCopy' CSV QUOTE '\"' DELIMITER ',' ignoreheader 1 acceptinvchars;",
            "delete from aiq_data.sales_order using aiq_data_staging.sales_order where aiq_data.sales_order.order_id = aiq_data_staging.sales_order.order_id;",
            "insert into aiq_data.sales_order select * from aiq_data_staging.sales_order;",
            "end;",
        ]
    );
    Ok(())
}

#[test]
fn test_unresolved_variable_fails_load() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("pipeline.toml");
    let content = std::fs::read_to_string("configs/aiq.toml")?.replace(
        "https://api.openweathermap.org/data/2.5/weather",
        "${STAGED_ETL_TEST_UNSET_WEATHER_URL}",
    );
    std::fs::write(&path, content)?;

    let err = PipelineFile::from_file(&path).unwrap_err();
    assert!(err.to_string().contains("STAGED_ETL_TEST_UNSET_WEATHER_URL"));
    Ok(())
}

#[test]
fn test_cyclic_runs_are_rejected() -> Result<()> {
    let content = std::fs::read_to_string("configs/aiq.toml")?.replace(
        "tables = [\"sales_order\"]",
        "tables = [\"sales_order\"]\nafter = [\"customer_and_weather\"]",
    );
    let pipeline = PipelineFile::from_toml_str(&content)?;
    let err = pipeline.plan().unwrap_err();
    assert!(err.to_string().contains("cycle"));
    Ok(())
}
