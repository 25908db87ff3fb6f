mod common;

use blockscan::geometry::Axis;
use blockscan::script::Value;
use blockscan::{
    grade_tonnage, section, swath, DensitySource, EngineConfig, Events, GradeRange,
    GradeTonnageRequest, ScanError, ScanRequest, SectionRequest, SwathRequest, SwathStatistic,
};
use common::{regular_model, write_file};

fn swath_request(path: &std::path::Path, bin_width: f64, variables: &[&str]) -> SwathRequest {
    SwathRequest {
        scan: ScanRequest::new(path),
        axis: Axis::X,
        bin_width,
        origin: None,
        variables: variables.iter().map(|v| v.to_string()).collect(),
        statistic: SwathStatistic::Mean,
    }
}

fn section_request(path: &std::path::Path, position: f64, tolerance: f64) -> SectionRequest {
    SectionRequest {
        scan: ScanRequest::new(path),
        normal_axis: Axis::Z,
        position,
        tolerance,
        color_variable: "au".into(),
        max_blocks: None,
    }
}

#[tokio::test]
async fn swath_bins_along_x() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "model.csv", regular_model().as_bytes())?;

    let result = swath(
        &swath_request(&path, 10.0, &["au", "cu"]),
        &EngineConfig::default(),
        &Events::none(),
    )
    .await?;

    assert_eq!(result.column, "xc");
    let centers: Vec<f64> = result.bins.iter().map(|b| b.center).collect();
    assert_eq!(centers, vec![5.0, 15.0, 25.0, 35.0]);
    assert!(result.bins.iter().all(|b| b.rows == 6));

    // first column holds blocks 0, 4, 8, 12, 16, 20
    let au = &result.bins[0].variables["au"];
    assert_eq!(au.count, 6);
    assert_eq!(au.sum, 9.0);
    assert_eq!(au.value, Some(1.5));
    assert_eq!(au.min, Some(0.0));
    assert_eq!(au.max, Some(3.0));
    Ok(())
}

#[tokio::test]
async fn swath_respects_filters_and_statistic() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "model.csv", regular_model().as_bytes())?;

    let mut request = swath_request(&path, 20.0, &["au"]);
    request.origin = Some(-5.0);
    request.statistic = SwathStatistic::Count;
    request.scan.filter_expression = Some("r.domain == \"OX\"".into());
    let result = swath(&request, &EngineConfig::default(), &Events::none()).await?;

    assert_eq!(result.summary.rows_admitted, 12);
    let edges: Vec<(f64, f64)> = result.bins.iter().map(|b| (b.from, b.to)).collect();
    assert_eq!(edges, vec![(-5.0, 15.0), (15.0, 35.0), (35.0, 55.0)]);
    let counts: Vec<Option<f64>> = result
        .bins
        .iter()
        .map(|b| b.variables["au"].value)
        .collect();
    assert_eq!(counts, vec![Some(3.0), Some(6.0), Some(3.0)]);
    Ok(())
}

#[tokio::test]
async fn swath_rejects_bad_requests() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "model.csv", regular_model().as_bytes())?;
    let config = EngineConfig::default();

    let err = swath(&swath_request(&path, 0.0, &["au"]), &config, &Events::none())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::InvalidRequest(_)));

    let err = swath(&swath_request(&path, 10.0, &["ag"]), &config, &Events::none())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::MissingColumn(name) if name == "ag"));
    Ok(())
}

#[tokio::test]
async fn grade_tonnage_curve_is_cumulative() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "model.csv", regular_model().as_bytes())?;

    let request = GradeTonnageRequest {
        scan: ScanRequest::new(&path),
        variables: vec![GradeRange {
            name: "au".into(),
            min: 0.0,
            max: 3.5,
        }],
        buckets: Some(7),
        density: Some(DensitySource::Column("density".into())),
        weight_column: None,
        volume_override: None,
        block_volume: Some(1000.0),
    };
    let result = grade_tonnage(&request, &EngineConfig::default(), &Events::none()).await?;

    assert_eq!(result.rows_without_tonnage, 0);
    let curve = &result.curves[0];
    assert_eq!(curve.points.len(), 7);
    let total = 24.0 * 1000.0 * 2.7;
    assert!((curve.points[0].tonnage - total).abs() < 1e-6);
    assert!((curve.total_tonnage() - total).abs() < 1e-6);
    assert!(curve
        .points
        .windows(2)
        .all(|w| w[1].tonnage <= w[0].tonnage && w[1].cutoff > w[0].cutoff));

    // blocks 6, 13 and 20 carry the top grade
    let top = &curve.points[6];
    assert_eq!(top.cutoff, 3.0);
    assert!((top.tonnage - 3.0 * 2700.0).abs() < 1e-6);
    assert!((top.grade.unwrap_or_default() - 3.0).abs() < 1e-9);
    Ok(())
}

#[tokio::test]
async fn grade_tonnage_caps_groups_but_keeps_totals() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "model.csv", regular_model().as_bytes())?;

    let mut scan = ScanRequest::new(&path);
    scan.group_by_column = Some("domain".into());
    let request = GradeTonnageRequest {
        scan,
        variables: vec![GradeRange {
            name: "au".into(),
            min: 0.0,
            max: 3.5,
        }],
        buckets: Some(7),
        density: Some(DensitySource::Constant(2.0)),
        weight_column: None,
        volume_override: Some(1.0),
        block_volume: None,
    };
    let config = EngineConfig {
        grade_tonnage_group_cap: 1,
        ..EngineConfig::default()
    };
    let result = grade_tonnage(&request, &config, &Events::none()).await?;

    assert!(result.groups_overflowed);
    assert_eq!(result.group_column.as_deref(), Some("domain"));
    let curve = &result.curves[0];
    assert_eq!(curve.groups.len(), 1);
    assert_eq!(curve.groups["OX"][0].tonnage, 24.0);
    assert_eq!(curve.points[0].tonnage, 48.0);
    Ok(())
}

#[tokio::test]
async fn section_selects_an_inclusive_slab() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "model.csv", regular_model().as_bytes())?;
    let config = EngineConfig::default();

    let result = section(&section_request(&path, 5.0, 10.0), &config, &Events::none()).await?;
    assert_eq!((result.u_axis, result.v_axis), (Axis::X, Axis::Y));
    assert_eq!(result.matched, 12);
    assert!(!result.truncated);
    assert_eq!((result.blocks[0].u, result.blocks[0].v), (5.0, 5.0));
    assert_eq!(result.blocks[1].value, Value::Num(0.5));

    // the lower layer sits exactly on the slab edge
    let result = section(&section_request(&path, 15.0, 20.0), &config, &Events::none()).await?;
    assert_eq!(result.matched, 24);

    let result = section(&section_request(&path, 10.0, 0.0), &config, &Events::none()).await?;
    assert_eq!(result.matched, 0);
    assert!(result.blocks.is_empty());
    Ok(())
}

#[tokio::test]
async fn section_truncates_at_max_blocks() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "model.csv", regular_model().as_bytes())?;

    let mut request = section_request(&path, 10.0, 30.0);
    request.max_blocks = Some(5);
    let result = section(&request, &EngineConfig::default(), &Events::none()).await?;

    assert_eq!(result.blocks.len(), 5);
    assert_eq!(result.matched, 24);
    assert!(result.truncated);

    let mut request = section_request(&path, 5.0, -1.0);
    request.max_blocks = None;
    let err = section(&request, &EngineConfig::default(), &Events::none())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::InvalidRequest(_)));
    Ok(())
}
