use medallion_types::{DataType, PipelineError, SchemaVersion, TopicName, TopicStage};

#[test]
fn parses_dotted_data_type_segment() {
    let t: TopicName = "ingestion.market.caiso.lmp.dam.raw.v1".parse().unwrap();
    assert_eq!(t.domain, "ingestion");
    assert_eq!(t.market, "market");
    assert_eq!(t.source, "caiso");
    assert_eq!(t.data_type, DataType::LmpDam);
    assert_eq!(t.stage, TopicStage::Raw);
    assert_eq!(t.version, SchemaVersion(1));
}

#[test]
fn renders_back_to_the_same_name() {
    for name in [
        "ingestion.market.caiso.lmp.dam.raw.v1",
        "ingestion.market.caiso.generation.actual.normalized.v2",
        "ingestion.market.wecc.crr.dlq.v1",
    ] {
        let t: TopicName = name.parse().unwrap();
        assert_eq!(t.to_string(), name);
    }
}

#[test]
fn dead_letter_twin_keeps_other_segments() {
    let raw = TopicName::ingestion("market", "caiso", DataType::AsRtm, TopicStage::Raw);
    assert_eq!(
        raw.at_stage(TopicStage::Dlq).to_string(),
        "ingestion.market.caiso.as.rtm.dlq.v1"
    );
}

#[test]
fn malformed_names_are_invalid_args() {
    for bad in [
        "ingestion.market.caiso.raw.v1",
        "ingestion.market.caiso.lmp.dam.raw.1",
        "ingestion.market.caiso.lmp.dam.bronze.v1",
        "ingestion.market.caiso.lmp.weekly.raw.v1",
        "ingestion..caiso.lmp.dam.raw.v1",
    ] {
        let err = bad.parse::<TopicName>().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArg(_)), "{bad}: {err}");
    }
}
