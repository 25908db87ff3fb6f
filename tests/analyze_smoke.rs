mod common;

use blockscan::geometry::Axis;
use blockscan::schema::ColumnType;
use blockscan::{
    analyze, spawn_pass, EngineConfig, ErrorKind, Events, Message, PassRequest, ScanError,
    ScanRequest,
};
use common::{gzip, regular_model, write_file};
use futures::StreamExt;

#[tokio::test]
async fn analyzes_regular_model() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "model.csv", regular_model().as_bytes())?;

    let result = analyze(&ScanRequest::new(&path), &EngineConfig::default(), &Events::none()).await?;

    assert_eq!(result.summary.rows_read, 24);
    assert_eq!(result.summary.rows_admitted, 24);
    assert_eq!(result.delimiter, ',');
    let kinds: Vec<ColumnType> = result.columns.iter().map(|c| c.kind).collect();
    assert_eq!(kinds[..6], [ColumnType::Numeric; 6]);
    assert_eq!(kinds[6], ColumnType::Categorical);

    let au = result.numeric("au").expect("au stats");
    assert_eq!(au.count, 24);
    assert_eq!(au.nulls, 0);
    assert_eq!(au.min, Some(0.0));
    assert_eq!(au.max, Some(3.0));

    let domain = result.category("domain").expect("domain counts");
    assert!(!domain.overflowed);
    assert_eq!(
        domain.values,
        vec![("FR".to_string(), 12), ("OX".to_string(), 12)]
    );

    let x = &result.geometry.axes[0];
    assert_eq!(x.axis, Axis::X);
    assert_eq!(x.column, "xc");
    assert_eq!(x.block_size, Some(10.0));
    assert_eq!(x.origin, Some(5.0));
    assert_eq!(x.grid_count, 4);
    assert_eq!(x.extent, Some(40.0));
    assert!(!x.sub_blocked);
    let counts: Vec<u64> = result.geometry.axes.iter().map(|a| a.grid_count).collect();
    assert_eq!(counts, vec![4, 3, 2]);
    assert_eq!(result.geometry.order.fastest(), Some(Axis::X));
    assert_eq!(result.geometry.order.order, vec![Axis::X, Axis::Y, Axis::Z]);
    Ok(())
}

#[tokio::test]
async fn identical_input_gives_identical_output() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "model.csv", regular_model().as_bytes())?;
    let mut request = ScanRequest::new(&path);
    request.group_by_column = Some("domain".into());
    request.derived_column_script = Some("r.aueq = r.au + r.cu * 0.5".into());

    let config = EngineConfig::default();
    let mut runs = Vec::new();
    for _ in 0..2 {
        let mut r = analyze(&request, &config, &Events::none()).await?;
        r.summary.elapsed_ms = 0;
        runs.push(serde_json::to_string(&r)?);
    }
    assert_eq!(runs[0], runs[1]);
    Ok(())
}

#[tokio::test]
async fn reads_gzip_sources() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let gz = gzip(regular_model().as_bytes()).await?;
    let path = write_file(dir.path(), "model.csv.gz", &gz)?;

    let result = analyze(&ScanRequest::new(&path), &EngineConfig::default(), &Events::none()).await?;
    assert_eq!(result.summary.rows_read, 24);
    assert_eq!(result.numeric("xc").map(|s| s.count), Some(24));
    Ok(())
}

#[tokio::test]
async fn sniffs_semicolons_and_skips_comments() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let text = "# exported block model\n# units: m\n\"x\";\"y\";\"z\";\"zone\"\n1;2;3;A\n# mid-file note\n2;2;3;B\n3;2;3;C\n";
    let path = write_file(dir.path(), "model.txt", text.as_bytes())?;

    let result = analyze(&ScanRequest::new(&path), &EngineConfig::default(), &Events::none()).await?;
    assert_eq!(result.delimiter, ';');
    let names: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["x", "y", "z", "zone"]);
    assert_eq!(result.summary.rows_read, 3);
    let zone = result.category("zone").expect("zone counts");
    assert_eq!(zone.distinct, 3);
    Ok(())
}

#[tokio::test]
async fn filter_runtime_errors_exclude_only_their_row() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut text = String::from("xc,au\n");
    for i in 0..9 {
        text.push_str(&format!("{i},{}\n", i as f64 * 0.25));
    }
    text.push_str("9,pending\n");
    let path = write_file(dir.path(), "model.csv", text.as_bytes())?;

    let mut request = ScanRequest::new(&path);
    request.filter_expression = Some("r.au * 2 >= 1".into());
    let result = analyze(&request, &EngineConfig::default(), &Events::none()).await?;

    assert_eq!(result.summary.rows_read, 10);
    assert_eq!(result.summary.filter_errors, 1);
    // 0.5, 0.75 … 2.0
    assert_eq!(result.summary.rows_admitted, 7);
    assert_eq!(result.numeric("au").map(|s| s.count), Some(7));
    Ok(())
}

#[tokio::test]
async fn derived_runtime_errors_do_not_abort() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut text = String::from("xc,au,rock\n");
    for i in 0..9 {
        text.push_str(&format!("{i},{i},OX\n"));
    }
    text.push_str("9,n.s.,OX\n");
    let path = write_file(dir.path(), "model.csv", text.as_bytes())?;

    let mut request = ScanRequest::new(&path);
    request.derived_column_script =
        Some("r.tag = lower(r.rock); r.au2 = r.au * 2; category(\"tag\")".into());
    let result = analyze(&request, &EngineConfig::default(), &Events::none()).await?;

    assert_eq!(result.summary.rows_admitted, 10);
    assert_eq!(result.summary.derive_errors, 1);
    let au2 = result.numeric("au2").expect("derived column");
    assert_eq!(au2.count, 9);
    assert_eq!(au2.nulls, 1);
    assert_eq!(au2.max, Some(16.0));
    let tag = result.category("tag").expect("derived category");
    assert_eq!(tag.values, vec![("ox".to_string(), 10)]);
    Ok(())
}

#[tokio::test]
async fn compile_errors_are_fatal_and_routed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "model.csv", regular_model().as_bytes())?;
    let config = EngineConfig::default();

    let mut request = ScanRequest::new(&path);
    request.filter_expression = Some("r.au >".into());
    let err = analyze(&request, &config, &Events::none()).await.unwrap_err();
    assert!(matches!(err, ScanError::FilterCompile(_)));
    assert_eq!(err.kind(), ErrorKind::Filter);

    let mut request = ScanRequest::new(&path);
    request.derived_column_script = Some("r.x = explode(r.au)".into());
    let err = analyze(&request, &config, &Events::none()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Script);
    Ok(())
}

#[tokio::test]
async fn empty_input_is_a_format_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "empty.csv", b"# nothing here\n\n")?;
    let err = analyze(&ScanRequest::new(&path), &EngineConfig::default(), &Events::none())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::EmptyInput));
    assert_eq!(err.kind(), ErrorKind::Format);
    Ok(())
}

#[tokio::test]
async fn category_cap_and_group_cap_set_flags() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut text = String::from("id,zone,au\n");
    for (i, zone) in ["a", "b", "c", "a", "d", "a", "e"].iter().enumerate() {
        text.push_str(&format!("{i},{zone},{i}\n"));
    }
    let path = write_file(dir.path(), "zones.csv", text.as_bytes())?;

    let mut request = ScanRequest::new(&path);
    request.group_by_column = Some("zone".into());
    request
        .type_overrides
        .insert("id".into(), ColumnType::Categorical);
    let config = EngineConfig {
        category_cap: 3,
        group_cap: 2,
        ..EngineConfig::default()
    };
    let result = analyze(&request, &config, &Events::none()).await?;

    let zone = result.category("zone").expect("zone counts");
    assert!(zone.overflowed);
    assert_eq!(zone.distinct, 3);
    assert_eq!(zone.values[0], ("a".to_string(), 2));

    let groups = result.groups.as_ref().expect("grouped stats");
    assert!(groups.overflowed);
    assert_eq!(groups.rows.len(), 2);
    assert_eq!(groups.rows["a"], 3);
    assert_eq!(groups.stats["b"]["au"].count, 1);
    assert_eq!(result.numeric("au").map(|s| s.count), Some(7));
    Ok(())
}

#[tokio::test]
async fn spawned_pass_streams_header_then_result() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "model.csv", regular_model().as_bytes())?;

    let handle = spawn_pass(
        PassRequest::Analyze(ScanRequest::new(&path)),
        EngineConfig::default(),
    );
    let messages: Vec<Message> = handle.into_stream().collect().await;

    assert!(matches!(messages.first(), Some(Message::Header(h)) if h.row_variable == "r"));
    match messages.last() {
        Some(Message::Complete(result)) => assert_eq!(result.summary.rows_read, 24),
        other => panic!("expected completion, got {other:?}"),
    }

    let missing = dir.path().join("missing.csv");
    let handle = spawn_pass(
        PassRequest::Analyze(ScanRequest::new(missing)),
        EngineConfig::default(),
    );
    let messages: Vec<Message> = handle.into_stream().collect().await;
    assert!(matches!(
        messages.as_slice(),
        [Message::Error { kind: ErrorKind::Io, .. }]
    ));
    Ok(())
}

fn progress_of(messages: &[Message]) -> Vec<&blockscan::Progress> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::Progress(p) => Some(p),
            _ => None,
        })
        .collect()
}

async fn run_pass(path: &std::path::Path, config: EngineConfig) -> Vec<Message> {
    let handle = spawn_pass(PassRequest::Analyze(ScanRequest::new(path)), config);
    handle.into_stream().collect().await
}

#[tokio::test]
async fn progress_messages_arrive_between_header_and_result() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut text = String::from("xc,yc,zc,au\n");
    for i in 0..5_000u32 {
        let (x, y, z) = (i % 20, (i / 20) % 25, i / 500);
        text.push_str(&format!("{},{},{},{:.3}\n", x * 5, y * 5, z * 5, (i % 97) as f64 * 0.031));
    }
    let path = write_file(dir.path(), "model.csv", text.as_bytes())?;

    // row threshold only
    let messages = run_pass(
        &path,
        EngineConfig {
            progress_rows: 1000,
            ..EngineConfig::default()
        },
    )
    .await;
    assert!(matches!(messages.first(), Some(Message::Header(_))));
    assert!(matches!(messages.last(), Some(Message::Complete(_))));
    let reports = progress_of(&messages);
    assert!(reports.len() >= 3, "{} progress messages", reports.len());
    assert!(reports.iter().all(|p| p.rows % 1000 == 0));
    assert!(reports.windows(2).all(|w| w[1].rows > w[0].rows));
    assert!(reports.iter().all(|p| p.fraction.map_or(true, |f| f <= 1.0)));

    // byte threshold only
    let messages = run_pass(
        &path,
        EngineConfig {
            progress_rows: u64::MAX,
            progress_bytes: 4096,
            ..EngineConfig::default()
        },
    )
    .await;
    assert!(matches!(messages.first(), Some(Message::Header(_))));
    assert!(matches!(messages.last(), Some(Message::Complete(_))));
    let reports = progress_of(&messages);
    assert!(!reports.is_empty());
    assert!(reports[0].bytes >= 4096);
    assert!(reports
        .windows(2)
        .all(|w| w[1].rows > w[0].rows && w[1].bytes - w[0].bytes >= 4096));
    assert!(reports
        .iter()
        .all(|p| p.fraction.is_some_and(|f| f > 0.0 && f <= 1.0)));
    Ok(())
}

#[tokio::test]
async fn derived_coordinates_keep_their_precision() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut text = String::from("i,au\n");
    for i in 0..40 {
        text.push_str(&format!("{i},{}\n", i % 7));
    }
    let path = write_file(dir.path(), "model.csv", text.as_bytes())?;

    let mut request = ScanRequest::new(&path);
    request.derived_column_script = Some("r.xc = r.i * 2.5".into());
    let result = analyze(&request, &EngineConfig::default(), &Events::none()).await?;

    let x = result
        .geometry
        .axes
        .iter()
        .find(|a| a.axis == Axis::X)
        .expect("x axis");
    assert_eq!(x.column, "xc");
    assert_eq!(x.precision, 1);
    assert_eq!(x.block_size, Some(2.5));
    assert_eq!(x.grid_count, 40);
    Ok(())
}
