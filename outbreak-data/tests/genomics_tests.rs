//! Integration tests for the genomics report assemblers

mod helpers;

use helpers::{mock_api, MockTransport};
use outbreak_data::genomics::reports::REPORT_LIST_THRESHOLD;
use outbreak_data::genomics::TrackedQuery;
use outbreak_data::status::{
    LOCATION_BASIC_LOADING, LOCATION_LINEAGES_LOADING, LOCATION_TABLE_LOADING, REPORT_LOADING,
};
use outbreak_data::{FetchStatus, Location, QueryError};
use serde_json::json;

fn server_error() -> QueryError {
    QueryError::Status {
        status: 500,
        body: "internal".to_string(),
    }
}

fn install_curated(mock: &MockTransport) {
    mock.route("curated_mutations.json").reply(json!([
        {
            "mutation_name": "P.1",
            "reportType": "lineage",
            "variantType": "Variant of Concern",
            "mutations": [{"mutation": "s:e484k", "gene": "S"}]
        },
        {
            "mutation_name": "B.1.1.7",
            "reportType": "lineage",
            "variantType": "Variant of Concern",
            "mutations": [{"mutation": "s:n501y", "gene": "S"}]
        },
        {
            "mutation_name": "B.1.526",
            "reportType": "lineage",
            "variantType": "Variant of Interest"
        },
        {
            "mutation_name": "S:E484K",
            "reportType": "mutation",
            "variantType": "Mutation of Concern",
            "mutations": [{"mutation": "s:e484k", "gene": "S"}]
        }
    ]));
}

fn install_build_date(mock: &MockTransport) {
    mock.route("genomics.test/metadata")
        .reply(json!({"build_date": "2021-03-01T12:00:00+00:00"}));
}

#[tokio::test]
async fn test_report_data_tolerates_member_failure() {
    let (api, mock, observer) = mock_api();
    install_build_date(&mock);
    install_curated(&mock);
    mock.route("most-recent-submission-date")
        .reply(json!({"results": []}));
    mock.route("global-prevalence")
        .when("cumulative", "true")
        .reply(json!({"results": {
            "global_prevalence": 0.25,
            "total_sequences": 1000,
            "lineage_count": 250,
            "first_detected": "2020-09-20",
            "last_detected": "2021-03-01"
        }}));
    mock.route("global-prevalence").reply(json!({"results": [
        {"date": "2021-01-01", "total_count": 10, "lineage_count": 2, "proportion": 0.2}
    ]}));
    mock.route("prevalence-by-location")
        .when("country", "United Kingdom")
        .reply(json!({"results": {"global_prevalence": 0.5, "lineage_count": 100}}));
    mock.route("lineage-by-country-most-recent")
        .when("detected", "true")
        .reply(json!({"results": {"names": ["united kingdom", "ireland"]}}));
    mock.route("lineage-by-country-most-recent").reply(json!({"results": [
        {"name": "united kingdom", "proportion": 0.5, "date": "2021-02-01"}
    ]}));
    mock.route("lineage-by-division-most-recent").fail(server_error());
    mock.route("lineage-mutations")
        .reply(json!({"results": [{"mutation": "s:p681h", "gene": "S"}]}));

    let locations = vec![Location::country("United Kingdom")];
    let result = api
        .genomics
        .report_data(&locations, None, Some("B.1.1.7"), &Location::worldwide())
        .await;

    // One member failed: still a success, with the error kept
    assert_eq!(result.status, FetchStatus::Success);
    assert_eq!(result.error, Some(server_error()));
    assert!(!result.is_complete());

    let report = result.value;
    assert!(report.states.is_empty());
    assert_eq!(report.countries, vec!["United Kingdom", "Ireland"]);
    assert_eq!(report.by_country[0].name, "United Kingdom");
    assert_eq!(report.by_country[0].location_id, "country_UnitedKingdom");
    assert_eq!(report.by_country[0].proportion_formatted, "50%");
    assert_eq!(report.global_prev.proportion_formatted, "25%");
    assert_eq!(report.global_prev.lineage_count_formatted, "250");
    assert_eq!(report.global_prev.first_detected.as_deref(), Some("20 Sep 2020"));
    assert_eq!(report.loc_prev.len(), 1);
    assert_eq!(report.loc_prev[0].proportion_formatted, "50%");
    assert_eq!(report.longitudinal.len(), 1);
    assert_eq!(report.new_today.len(), 2);
    assert!(report.new_today.iter().all(|n| n.count.is_none()));
    assert_eq!(report.date_updated.date_updated.as_deref(), Some("1 March 2021"));

    // Curated mutations win over the characteristic lookup
    assert_eq!(report.md.as_ref().map(|m| m.mutation_name.as_str()), Some("B.1.1.7"));
    assert_eq!(report.mutations[0].mutation, "s:n501y");

    // No mutation list: no mutation-level requests
    assert!(mock.requests_to("mutation-details").is_empty());
    assert_eq!(observer.events_for(REPORT_LOADING), vec![true, false]);
}

#[tokio::test]
async fn test_uncurated_lineage_uses_characteristic_mutations() {
    let (api, mock, _observer) = mock_api();
    install_curated(&mock);
    mock.route("lineage-mutations")
        .reply(json!({"results": [{"mutation": "s:p681h", "gene": "S"}]}));

    let result = api
        .genomics
        .report_data(&[], None, Some("A.23.1"), &Location::worldwide())
        .await;

    assert!(result.value.md.is_none());
    assert_eq!(result.value.mutations[0].mutation, "s:p681h");
    let request = &mock.requests_to("lineage-mutations")[0];
    assert_eq!(request.param("pangolin_lineage"), Some("A.23.1"));
    assert_eq!(request.param("frequency"), Some("0.97"));
}

#[tokio::test]
async fn test_report_list_attaches_lineages_to_mutations() {
    let (api, mock, _observer) = mock_api();
    install_build_date(&mock);
    install_curated(&mock);
    mock.route("mutations-by-lineage").reply(json!({"results": [
        {"pangolin_lineage": "b.1.351", "proportion": 0.9},
        {"pangolin_lineage": "p.1", "proportion": 0.5}
    ]}));

    let result = api.genomics.report_list(REPORT_LIST_THRESHOLD).await;

    assert!(result.is_complete());
    let report = result.value;
    assert!(report.date_updated.is_some());
    let keys: Vec<&str> = report.md.iter().map(|g| g.key.as_str()).collect();
    assert_eq!(keys, vec!["mutation", "lineage"]);
    assert_eq!(report.md[0].values[0].lineages, vec!["B.1.351"]);
    assert!(report.md[1].values.iter().all(|e| e.lineages.is_empty()));
    assert_eq!(
        mock.requests_to("mutations-by-lineage")[0].param("mutations"),
        Some("s:e484k")
    );
}

#[tokio::test]
async fn test_basic_location_report() {
    let (api, mock, observer) = mock_api();
    install_build_date(&mock);
    install_curated(&mock);
    mock.route("sequence-count")
        .when("country", "Canada")
        .reply(json!({"results": [{"total_count": 1234567}]}));

    let result = api
        .genomics
        .basic_location_report(&Location::country("Canada"))
        .await;

    assert!(result.is_complete());
    let report = result.value;
    assert_eq!(report.total.as_deref(), Some("1,234,567"));
    let labels: Vec<&str> = report.curated.iter().map(|t| t.label.as_str()).collect();
    assert_eq!(labels, vec!["B.1.1.7", "P.1", "B.1.526"]);
    assert_eq!(report.curated[0].query.lineage.as_deref(), Some("B.1.1.7"));
    assert_eq!(report.curated[2].variant_type.as_deref(), Some("Variant of Interest"));
    assert_eq!(observer.events_for(LOCATION_BASIC_LOADING), vec![true, false]);
}

#[tokio::test]
async fn test_location_report_lineage_domain() {
    let (api, mock, observer) = mock_api();
    mock.route("prevalence-by-country-all-lineages")
        .when("cumulative", "true")
        .reply(json!({"results": [
            {"lineage": "other", "prevalence": 0.3},
            {"lineage": "b.1.1.7", "prevalence": 0.7}
        ]}));
    mock.route("prevalence-by-country-all-lineages").reply(json!({"results": [
        {"date": "2021-01-01", "lineage": "b.1.177", "prevalence_rolling": 0.2},
        {"date": "2021-01-01", "lineage": "b.1.1.7", "prevalence_rolling": 0.5},
        {"date": "2021-01-01", "lineage": "other", "prevalence_rolling": 0.3}
    ]}));

    let result = api
        .genomics
        .location_report(&Location::country("United Kingdom"), 0.03, 5, 60)
        .await;

    assert!(result.is_complete());
    let report = result.value;
    assert_eq!(report.lineage_domain, vec!["Other", "B.1.1.7", "B.1.177"]);
    assert_eq!(report.most_recent_lineages[0].lineage, "B.1.1.7");
    assert_eq!(report.lineages_by_day.days.len(), 1);
    assert_eq!(report.lineages_by_day.days[0].prevalence["B.1.177"], 0.2);

    let request = &mock.requests_to("prevalence-by-country-all-lineages")[0];
    assert_eq!(request.param("country"), Some("United Kingdom"));
    assert_eq!(request.param("ndays"), Some("60"));
    assert_eq!(observer.events_for(LOCATION_LINEAGES_LOADING), vec![true, false]);
}

#[tokio::test]
async fn test_location_table_groups_by_variant_type() {
    let (api, mock, observer) = mock_api();
    mock.route("prevalence-by-location")
        .when("pangolin_lineage", "B.1.1.7")
        .reply(json!({"results": {"global_prevalence": 0.4, "lineage_count": 40}}));
    mock.route("prevalence-by-location")
        .when("pangolin_lineage", "P.1")
        .reply(json!({"results": {"global_prevalence": 0.0, "lineage_count": 0}}));
    mock.route("prevalence-by-location")
        .when("pangolin_lineage", "B.1.526")
        .fail(server_error());

    let voc = Some("Variant of Concern".to_string());
    let tracked = vec![
        TrackedQuery::lineage("P.1", voc.clone()),
        TrackedQuery::lineage("B.1.526", Some("Variant of Interest".to_string())),
        TrackedQuery::lineage("B.1.1.7", voc),
    ];
    let result = api
        .genomics
        .location_table(&Location::country("Canada"), &tracked)
        .await;

    assert_eq!(result.status, FetchStatus::Success);
    assert!(result.error.is_some());
    let groups = result.value;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].key, "Variant of Concern");
    let labels: Vec<&str> = groups[0].values.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["B.1.1.7", "P.1"]);
    assert_eq!(groups[0].values[1].prevalence.proportion_formatted, "not detected");
    assert_eq!(observer.events_for(LOCATION_TABLE_LOADING), vec![true, false]);
}

#[tokio::test]
async fn test_location_maps_for_division_skip_requests() {
    let (api, mock, _observer) = mock_api();
    let tracked = vec![TrackedQuery::lineage("B.1.1.7", None)];

    let result = api
        .genomics
        .location_maps(&Location::division("California"), &tracked, Some(60))
        .await;

    assert!(result.is_complete());
    assert_eq!(result.value[0].key, "B.1.1.7");
    assert!(result.value[0].values.is_empty());
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn test_all_temporal_prevalences_fails_when_every_member_fails() {
    let (api, mock, _observer) = mock_api();
    mock.route("prevalence-by-location").fail(server_error());
    let tracked = vec![
        TrackedQuery::lineage("B.1.1.7", None),
        TrackedQuery::lineage("P.1", None),
    ];

    let result = api
        .genomics
        .all_temporal_prevalences(&Location::country("Brazil"), &tracked)
        .await;

    assert_eq!(result.status, FetchStatus::Failure);
    assert_eq!(result.value.len(), 2);
    assert!(result.value.iter().all(|t| t.data.is_empty()));
}

#[tokio::test]
async fn test_compare_lineages_matrix() {
    let (api, mock, _observer) = mock_api();
    mock.route("lineage-mutations")
        .when("pangolin_lineage", "B.1.1.7")
        .reply(json!({"results": [
            {"mutation": "s:n501y", "gene": "S", "prevalence": 0.99},
            {"mutation": "s:p681h", "gene": "S", "prevalence": 0.98}
        ]}));
    mock.route("lineage-mutations")
        .when("pangolin_lineage", "B.1.351")
        .reply(json!({"results": [
            {"mutation": "s:e484k", "gene": "S", "prevalence": 0.97},
            {"mutation": "s:n501y", "gene": "S", "prevalence": 1.0}
        ]}));

    let lineages = vec!["B.1.1.7".to_string(), "B.1.351".to_string()];
    let result = api.genomics.compare_lineages(&lineages, 0.75).await;

    assert!(result.is_complete());
    let matrix = result.value;
    assert_eq!(matrix.lineages, lineages);
    assert_eq!(matrix.rows.len(), 3);
    assert_eq!(matrix.rows[0].mutation, "s:n501y");
    assert_eq!(matrix.rows[0].prevalence, vec![Some(0.99), Some(1.0)]);
    assert_eq!(matrix.rows[2].prevalence, vec![None, Some(0.97)]);
    assert!(mock
        .requests_to("lineage-mutations")
        .iter()
        .all(|r| r.param("frequency") == Some("0.75")));
}

#[tokio::test]
async fn test_sequencing_summary_shares() {
    let (api, mock, _observer) = mock_api();
    mock.route("sequence-count")
        .when("country", "United Kingdom")
        .reply(json!({"results": [{"total_count": 300}]}));
    mock.route("sequence-count")
        .when("country", "Canada")
        .fail(server_error());
    mock.route("sequence-count")
        .when("country", "Brazil")
        .reply(json!({"results": [{"total_count": 100}]}));
    mock.route("sequence-count")
        .reply(json!({"results": [{"total_count": 1000}]}));

    let locations = vec![
        Location::worldwide(),
        Location::country("Brazil"),
        Location::country("Canada"),
        Location::country("United Kingdom"),
    ];
    let result = api.genomics.sequencing_summary(&locations).await;

    assert_eq!(result.status, FetchStatus::Success);
    let summary = result.value;
    assert_eq!(summary.total, 1000);
    assert_eq!(summary.total_formatted, "1,000");
    let names: Vec<&str> = summary.locations.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["United Kingdom", "Brazil"]);
    assert_eq!(summary.locations[0].share, Some(0.3));
    assert_eq!(summary.locations[1].count_formatted, "100");
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_report_views_run_side_by_side() {
    let (api, mock, observer) = mock_api();
    mock.route("lineage-mutations")
        .delay_ms(50)
        .reply(json!({"results": [{"mutation": "s:n501y", "gene": "S", "prevalence": 0.99}]}));
    mock.route("sequence-count")
        .delay_ms(10)
        .reply(json!({"results": [{"total_count": 100}]}));

    let lineages = vec!["B.1.1.7".to_string()];
    let locations = vec![Location::country("Canada")];
    let (comparison, summary) = tokio::join!(
        api.genomics.compare_lineages(&lineages, 0.75),
        api.genomics.sequencing_summary(&locations),
    );

    assert_eq!(comparison.status, FetchStatus::Success);
    assert_eq!(comparison.value.rows.len(), 1);
    assert_eq!(summary.status, FetchStatus::Success);
    assert_eq!(summary.value.total, 100);
    // Shared flag drops once, after the slower view
    assert_eq!(observer.events_for(REPORT_LOADING), vec![true, true, false]);
    assert!(!observer.is_loading(REPORT_LOADING));
}

#[tokio::test]
async fn test_lookup_title_cases_names() {
    let (api, mock, _observer) = mock_api();
    mock.route("genomics.test/country")
        .when("name", "*king*")
        .reply(json!({"results": [{"name": "united kingdom", "id": "GBR"}]}));

    let found = api.genomics.find_country("king").await.unwrap();

    assert_eq!(found[0].name, "United Kingdom");
    assert_eq!(found[0].extra["id"], "GBR");
    assert!(mock.requests()[0].param("timestamp").is_some());
}
