//! Integration tests for the resources search and summaries

mod helpers;

use helpers::mock_api;
use outbreak_data::resources::SummaryQuery;
use outbreak_data::status::RESOURCES_LOADING;
use outbreak_data::{FetchStatus, QueryError};
use serde_json::json;

#[tokio::test]
async fn test_search_combines_page_recent_and_facets() {
    let (api, mock, observer) = mock_api();
    mock.route("resources.test/query")
        .when("facet_size", "100")
        .reply(json!({"total": 0, "facets": {
            "@type": {"terms": [
                {"term": "Dataset", "count": 10},
                {"term": "Publication", "count": 7}
            ]},
            "keywords": {"terms": [{"term": "remdesivir", "count": 3}]}
        }}));
    mock.route("resources.test/query")
        .when("fields", "creator")
        .reply(json!({"hits": [
            {"_id": "recent1", "name": "Latest", "datePublished": "2021-03-01"}
        ]}));
    mock.route("resources.test/query").reply(json!({"total": 2, "hits": [
        {"_id": "old", "name": "Older", "datePublished": "2020-01-01"},
        {"_id": "new", "name": "Newer", "dateModified": "2021-02-01", "datePublished": "2020-06-01"}
    ]}));

    let result = api
        .resources
        .resources(Some("remdesivir"), Some("@type:Dataset"), None, 10, 0)
        .await;

    assert!(result.is_complete());
    let search = result.value;
    assert_eq!(search.total, 2);
    let ids: Vec<_> = search.results.iter().map(|h| h.id.as_deref()).collect();
    assert_eq!(ids, vec![Some("new"), Some("old")]);
    assert_eq!(search.results[0].date.as_deref(), Some("2021-02-01"));
    assert_eq!(search.recent.len(), 1);

    assert_eq!(search.facets[0].id, "@type");
    assert_eq!(search.facets[0].variable, "type");
    assert!(search.facets[0].counts[0].checked);
    assert!(!search.facets[0].counts[1].checked);

    for request in mock.requests() {
        assert_eq!(request.param("q"), Some("remdesivir AND @type:(\"Dataset\")"));
    }
    assert_eq!(observer.events_for(RESOURCES_LOADING), vec![true, false]);
}

#[tokio::test]
async fn test_empty_search_matches_all_and_survives_facet_failure() {
    let (api, mock, _observer) = mock_api();
    mock.route("resources.test/query")
        .when("facet_size", "100")
        .fail(QueryError::Transport("timed out".to_string()));
    mock.route("resources.test/query")
        .reply(json!({"total": 0, "hits": []}));

    let result = api.resources.resources(None, None, None, 10, 0).await;

    assert_eq!(result.status, FetchStatus::Success);
    assert_eq!(result.error, Some(QueryError::Transport("timed out".to_string())));
    assert!(result.value.facets.is_empty());
    assert!(mock
        .requests()
        .iter()
        .all(|r| r.param("q") == Some("__all__")));
}

#[tokio::test]
async fn test_resource_metadata_lookup() {
    let (api, mock, _observer) = mock_api();
    mock.route("resources.test/query")
        .when("q", "zenodo.4587")
        .reply(json!({"hits": [{"_id": "zenodo.4587", "name": "Dataset", "dateCreated": "2021-01-05"}]}));
    mock.route("resources.test/query").reply(json!({"hits": []}));

    let found = api.resources.resource_metadata("zenodo.4587").await;
    let hit = found.value.expect("hit");
    assert_eq!(hit.date.as_deref(), Some("2021-01-05"));
    assert_eq!(mock.requests()[0].param("q"), Some("zenodo.4587"));

    let missing = api.resources.resource_metadata("pmid123").await;
    assert_eq!(missing.status, FetchStatus::Failure);
    assert!(missing.value.is_none());
    assert!(matches!(missing.error, Some(QueryError::Shape(_))));
    assert_eq!(mock.requests()[1].param("q"), Some("_id:\"pmid123\""));
}

#[tokio::test]
async fn test_source_summary_tree() {
    let (api, mock, _observer) = mock_api();
    mock.route("resources.test/metadata")
        .reply(json!({"build_date": "2021-03-05T10:00:00.000"}));
    mock.route("resources.test/query")
        .when("aggs", "@type")
        .reply(json!({"total": 1234, "facets": {"@type": {"terms": [
            {"term": "ClinicalTrial", "count": 10, "curatedBy.name": {"total": 8, "terms": [
                {"term": "ClinicalTrials.gov", "count": 5},
                {"term": "WHO International Clinical Trials Registry Platform", "count": 3}
            ]}}
        ]}}}));

    let result = api.resources.source_summary().await;

    assert!(result.is_complete());
    let summary = result.value;
    assert_eq!(summary.date_modified.as_deref(), Some("05 March 2021"));
    assert_eq!(summary.counts.total_formatted, "1,234");
    let trials = &summary.counts.sources.children[0];
    assert_eq!(trials.name, "ClinicalTrial");
    let sources: Vec<(&str, Option<u64>)> = trials
        .children
        .iter()
        .map(|c| (c.name.as_str(), c.count))
        .collect();
    assert_eq!(sources, vec![("NCT", Some(5)), ("WHO", Some(3)), ("Zenodo", Some(2))]);
}

#[tokio::test]
async fn test_query_summaries_drop_failed_queries() {
    let (api, mock, _observer) = mock_api();
    mock.route("resources.test/query")
        .when("q", "\"remdesivir\"")
        .reply(json!({"total": 5, "facets": {"@type": {"terms": [
            {"term": "Publication", "count": 4},
            {"term": "ClinicalTrial", "count": 1}
        ]}}}));
    mock.route("resources.test/query")
        .fail(QueryError::Decode("bad json".to_string()));

    let queries = vec![
        SummaryQuery {
            name: "Remdesivir".to_string(),
            terms: vec!["remdesivir".to_string(), "GS-5734".to_string()],
        },
        SummaryQuery {
            name: "Ivermectin".to_string(),
            terms: vec!["ivermectin".to_string()],
        },
    ];
    let result = api.resources.query_summaries(&queries).await;

    assert_eq!(result.status, FetchStatus::Success);
    assert!(result.error.is_some());
    assert_eq!(result.value.len(), 1);
    let summary = &result.value[0];
    assert_eq!(summary.total, 5);
    assert_eq!(summary.types[0].x, "Remdesivir");
    assert_eq!(summary.types[0].y, "Publication");
    assert_eq!(
        mock.requests()[0].param("q"),
        Some("(\"remdesivir\" OR \"GS-5734\")")
    );
}

#[tokio::test]
async fn test_lineage_resources_use_resources_backend() {
    let (api, mock, _observer) = mock_api();
    mock.route("resources.test/query").reply(json!({"total": 1, "hits": [
        {"_id": "pub1", "name": "B.1.1.7 growth", "date": "2021-02-03"}
    ]}));

    let page = api
        .genomics
        .lineage_resources("\"B.1.1.7\"", 5, 0, None)
        .await
        .unwrap();

    assert_eq!(page.total, 1);
    assert_eq!(page.results[0].date_formatted.as_deref(), Some("3 February 2021"));
    let request = &mock.requests()[0];
    assert_eq!(request.param("sort"), Some("-date"));
    assert_eq!(request.param("size"), Some("5"));
}

#[tokio::test]
async fn test_clinical_trial_summary() {
    let (api, mock, observer) = mock_api();
    mock.route("resources.test/query").reply(json!({"total": 2, "hits": [
        {"_id": "NCT04308668", "studyStatus": {"status": "completed"},
         "armGroup": [{"name": "HCQ", "intervention": [{"name": "hydroxychloroquine"}]}],
         "dateCreated": "2020-03-17"},
        {"_id": "NCT04318444", "studyStatus": {"status": "recruiting"}}
    ]}));

    let result = api.resources.ct_summary("hydroxychloroquine").await;

    assert!(result.is_complete());
    let trials = result.value;
    assert_eq!(trials.len(), 2);
    assert_eq!(trials[0].id.as_deref(), Some("NCT04308668"));
    assert_eq!(trials[0].extra["studyStatus"]["status"], "completed");
    assert_eq!(trials[0].extra["armGroup"][0]["name"], "HCQ");

    let request = &mock.requests()[0];
    assert_eq!(
        request.param("q"),
        Some("(name:\"hydroxychloroquine\" OR description:\"hydroxychloroquine\")")
    );
    assert_eq!(
        request.param("fields"),
        Some("armGroup.name,armGroup.intervention,dateCreated,studyStatus")
    );
    assert_eq!(request.param("size"), Some("1000"));
    assert!(request.param("timestamp").is_some());
    assert_eq!(observer.events_for(RESOURCES_LOADING), vec![true, false]);
}

#[tokio::test]
async fn test_clinical_trial_summary_failure() {
    let (api, mock, _observer) = mock_api();
    mock.route("resources.test/query")
        .fail(QueryError::Transport("connection reset".to_string()));

    let result = api.resources.ct_summary("ivermectin").await;

    assert_eq!(result.status, FetchStatus::Failure);
    assert!(result.value.is_empty());
    assert!(result.error.as_ref().is_some_and(QueryError::is_transport));
}
