mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{json_string, MockServlet};
use listings_tui::data::{ReputationService, ServletReputationService};
use listings_tui::listing::{ListingType, NewListing};
use listings_tui::reputation::{Vote, VoteControl};
use listings_tui::search::{SearchQuery, SortBy};
use listings_tui::servlet::{Client, ClientConfig, ServletError};
use listings_tui::widget::WidgetRegistry;

const LISTINGS_JSON: &str = r#"[
  {"key": "k1", "name": "Coat drive", "type": "event", "location": "Pittsburgh, PA",
   "upvotes": 4, "downvotes": 1, "vote": "neutral", "isOwnerUser": true},
  {"key": "k2", "name": "Save the park", "type": "petition", "location": "Austin, TX",
   "upvotes": 9, "downvotes": 0, "vote": "upvote", "isOwnerUser": false}
]"#;

fn client(servlet: &MockServlet) -> Client {
    Client::new(ClientConfig {
        user_agent: "listings-tui-tests".into(),
        base_url: Some(servlet.base_url.clone()),
        timeout: Some(Duration::from_secs(5)),
        http_client: None,
    })
    .unwrap()
}

#[test]
fn fetch_listings_sends_search_parameters() {
    let servlet = MockServlet::start(|_| (200, LISTINGS_JSON.to_string()));
    let mut query = SearchQuery {
        location: "Pittsburgh, PA".into(),
        sort: SortBy::MostRecent,
        ..SearchQuery::default()
    };
    query.toggle_type(ListingType::Other);

    let listings = client(&servlet).fetch_listings(&query).unwrap();
    assert_eq!(listings.len(), 2);
    assert_eq!(listings[1].vote, Vote::Upvote);

    let request = servlet.next_request();
    assert_eq!(request.method, "GET");
    assert_eq!(request.path(), "/fetch-listings");
    let params = request.query();
    assert!(params.contains(&("type-filters".into(), "1@2@3".into())));
    assert!(params.contains(&("radius-filter".into(), "10".into())));
    assert!(params.contains(&("sortBy".into(), "most-recent".into())));
    assert!(params.contains(&("location".into(), "Pittsburgh, PA".into())));
}

#[test]
fn update_reputation_posts_key_and_vote() {
    let servlet = MockServlet::start(|_| (200, String::new()));
    client(&servlet)
        .update_reputation(Vote::Downvote, "k1")
        .unwrap();

    let request = servlet.next_request();
    assert_eq!(request.method, "POST");
    assert_eq!(request.path(), "/reputation");
    assert_eq!(
        request.query(),
        vec![
            ("key".to_string(), "k1".to_string()),
            ("vote".to_string(), "downvote".to_string())
        ]
    );
}

#[test]
fn widget_click_reaches_the_servlet() {
    let servlet = MockServlet::start(|_| (200, LISTINGS_JSON.to_string()));
    let client = Arc::new(client(&servlet));
    let listings = client.fetch_listings(&SearchQuery::default()).unwrap();
    servlet.next_request();

    let sync: Arc<dyn ReputationService> = Arc::new(ServletReputationService::new(client));
    let registry = WidgetRegistry::new(Some(sync));
    let widget = registry.widget_for(&listings[1]);

    let transition = widget.lock().click(VoteControl::Upvote);
    assert_eq!(transition.state.vote, Vote::Neutral);
    assert_eq!(transition.state.upvotes, 8);

    let request = servlet.next_request();
    assert_eq!(request.path(), "/reputation");
    assert!(request.query().contains(&("key".into(), "k2".into())));
    assert!(request.query().contains(&("vote".into(), "neutral".into())));
}

#[test]
fn failed_reputation_post_does_not_touch_local_state() {
    let servlet = MockServlet::start(|request| match request.path() {
        "/reputation" => (500, "boom".to_string()),
        _ => (200, LISTINGS_JSON.to_string()),
    });
    let client = Arc::new(client(&servlet));
    let listings = client.fetch_listings(&SearchQuery::default()).unwrap();
    servlet.next_request();

    let sync: Arc<dyn ReputationService> = Arc::new(ServletReputationService::new(client));
    let registry = WidgetRegistry::new(Some(sync));
    let widget = registry.widget_for(&listings[0]);
    widget.lock().click(VoteControl::Downvote);

    assert_eq!(servlet.next_request().path(), "/reputation");
    assert!(servlet.no_more_requests());
    let widget = widget.lock();
    assert_eq!(widget.state().vote, Vote::Downvote);
    assert_eq!(widget.state().downvotes, 2);
}

#[test]
fn error_sentinel_becomes_servlet_error() {
    let servlet = MockServlet::start(|_| (200, json_string("Servlet Error: Listing not found.")));
    let err = client(&servlet).fetch_listing("missing").unwrap_err();
    let servlet_err = err.downcast_ref::<ServletError>().expect("typed servlet error");
    assert!(matches!(servlet_err, ServletError::Servlet(message) if message.contains("not found")));

    let request = servlet.next_request();
    assert_eq!(request.path(), "/fetch-listing");
    assert_eq!(request.query(), vec![("listing-key".into(), "missing".into())]);
}

#[test]
fn http_failures_carry_status() {
    let servlet = MockServlet::start(|_| (503, "unavailable".to_string()));
    let err = client(&servlet).fetch_user().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ServletError>(),
        Some(ServletError::Http { status: 503, .. })
    ));
}

#[test]
fn authentication_and_profile_endpoints() {
    let servlet = MockServlet::start(|request| match request.path() {
        "/authentication" => (
            200,
            r#"{"userIsLoggedIn": "true", "userIsAdmin": "false", "userEmail": "a@b.c", "logoutLink": "/_ah/logout"}"#.to_string(),
        ),
        "/fetch-user" => (
            200,
            r#"{"username": "Ada", "email": "a@b.c", "bio": "", "createdListingKeys": "k1", "upvotedListingKeys": "k1,k2"}"#.to_string(),
        ),
        _ => (200, LISTINGS_JSON.to_string()),
    });
    let client = client(&servlet);

    let info = client.authentication().unwrap();
    assert!(info.user_is_logged_in);
    assert!(!info.user_is_admin);
    servlet.next_request();

    let user = client.fetch_user().unwrap();
    assert_eq!(user.upvoted_keys(), vec!["k1", "k2"]);
    servlet.next_request();

    let listings = client.fetch_user_listings(&user.upvoted_keys()).unwrap();
    assert_eq!(listings.len(), 2);
    let request = servlet.next_request();
    assert_eq!(request.path(), "/fetch-user-listings");
    assert_eq!(request.query(), vec![("listing-keys".into(), "k1,k2".into())]);

    assert!(client.fetch_user_listings(&[]).unwrap().is_empty());
    assert!(servlet.no_more_requests());
}

#[test]
fn delete_listing_expects_success_sentinel() {
    let servlet = MockServlet::start(|request| match request.query().first() {
        Some((_, key)) if key == "k1" => (200, json_string("Servlet Success")),
        _ => (200, json_string("Servlet Error: User does not own listing.")),
    });
    let client = client(&servlet);

    client.delete_listing("k1").unwrap();
    let request = servlet.next_request();
    assert_eq!(request.method, "POST");
    assert_eq!(request.path(), "/delete-listing");

    assert!(client.delete_listing("k2").is_err());
}

#[test]
fn submit_listing_uploads_multipart_form() {
    let servlet = MockServlet::start(|request| match request.path() {
        "/blobstore-upload-url" => (200, json_string("/_ah/upload/abc")),
        "/_ah/upload/abc" => (200, json_string("Servlet Success")),
        _ => (404, String::new()),
    });
    let form = NewListing {
        name: "Coat drive".into(),
        listing_type: Some(ListingType::Event),
        location: "Pittsburgh, PA".into(),
        description: "Collecting winter coats.".into(),
        how_to_help: "Drop off coats.".into(),
        website: "https://example.org".into(),
        tags: "Winter".into(),
        image: None,
    };

    client(&servlet).submit_listing(&form, Some("k1")).unwrap();

    let url_request = servlet.next_request();
    assert_eq!(url_request.path(), "/blobstore-upload-url");
    assert_eq!(
        url_request.query(),
        vec![("servlet-url".into(), "/update-listing".into())]
    );

    let upload = servlet.next_request();
    assert_eq!(upload.method, "POST");
    assert_eq!(upload.path(), "/_ah/upload/abc");
    assert!(upload.body.contains("name=\"name\""));
    assert!(upload.body.contains("Coat drive"));
    assert!(upload.body.contains("name=\"howToHelp\""));
    assert!(upload.body.contains("name=\"listing-key\""));
    assert!(!upload.body.contains("name=\"key\""));
    assert!(upload.body.contains("winter"));
}

#[test]
fn update_preview_returns_stored_and_edited_listing() {
    let servlet = MockServlet::start(|request| match request.path() {
        "/blobstore-upload-url" => (200, json_string("/_ah/upload/preview")),
        "/_ah/upload/preview" => (
            200,
            r#"[{"key": "k1", "name": "Coat drive"}, {"key": "k1", "name": "Coat drive 2"}]"#
                .to_string(),
        ),
        _ => (404, String::new()),
    });
    let form = NewListing {
        name: "Coat drive 2".into(),
        listing_type: Some(ListingType::Event),
        ..NewListing::default()
    };

    let preview = client(&servlet).preview_listing(&form, Some("k1")).unwrap();
    assert_eq!(preview.len(), 2);
    assert_eq!(preview[1].name, "Coat drive 2");

    let url_request = servlet.next_request();
    assert_eq!(
        url_request.query(),
        vec![("servlet-url".into(), "/update-listing-preview".into())]
    );
    let upload = servlet.next_request();
    assert!(upload.body.contains("name=\"listing-key\""));
}

#[test]
fn preview_error_sentinel_is_reported() {
    let servlet = MockServlet::start(|request| match request.path() {
        "/blobstore-upload-url" => (200, json_string("/_ah/upload/preview")),
        _ => (200, json_string("Servlet Error: name is required.")),
    });
    let err = client(&servlet)
        .preview_listing(&NewListing::default(), None)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ServletError>(),
        Some(ServletError::Servlet(message)) if message.contains("name is required")
    ));
    assert_eq!(
        servlet.next_request().query(),
        vec![("servlet-url".into(), "/create-listing-preview".into())]
    );
}
