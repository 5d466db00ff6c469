use chrono::{Duration, Utc};

use beacon::models::{Coordinates, Emergency, Role, UserPresence};
use beacon::proximity::distance_meters;
use beacon::visibility::{Observer, PresencePartitions, VisibilityConfig, visible_set};

const STAGE: Coordinates = Coordinates::new(40.7580, -73.9855);

fn at(id: &str, role: Role, group: &str, coordinates: Coordinates) -> UserPresence {
    UserPresence::new(id, id, role, group, coordinates)
}

fn partitions(all: impl IntoIterator<Item = UserPresence>) -> PresencePartitions {
    let mut map = PresencePartitions::new();
    for presence in all {
        map.entry(presence.group_id.clone()).or_default().push(presence);
    }
    map
}

fn observer(id: &str, role: Role, group: &str, zoom: Option<f64>) -> Observer {
    Observer {
        user_id: id.into(),
        role,
        group_id: group.into(),
        zoom,
    }
}

fn ids(users: &[UserPresence]) -> Vec<&str> {
    users.iter().map(|p| p.user_id.as_str()).collect()
}

#[test]
fn distant_volunteer_is_hidden_from_peers_but_not_from_organizers() {
    // About 5.5 km north of the stage.
    let far = Coordinates::new(40.8080, -73.9855);
    assert!(distance_meters(STAGE, far) > 2_000.0);

    let all = partitions([
        at("V1", Role::Volunteer, "g1", STAGE),
        at("V2", Role::Volunteer, "g2", far),
        at("O1", Role::Organizer, "g1", STAGE),
    ]);
    let config = VisibilityConfig::default();
    let now = Utc::now();

    let v1 = visible_set(&observer("V1", Role::Volunteer, "g1", None), &all, &[], &config, now);
    assert_eq!(ids(&v1.users), ["O1"]);

    let o1 = visible_set(&observer("O1", Role::Organizer, "g1", None), &all, &[], &config, now);
    assert_eq!(ids(&o1.users), ["V1", "V2"]);
}

#[test]
fn organizers_only_see_their_own_groups_organizers() {
    let all = partitions([
        at("O1", Role::Organizer, "g1", STAGE),
        at("O2", Role::Organizer, "g1", STAGE),
        at("O3", Role::Organizer, "g2", STAGE),
        at("A1", Role::Attendee, "g1", STAGE),
    ]);
    let view = visible_set(
        &observer("O1", Role::Organizer, "g1", None),
        &all,
        &[],
        &VisibilityConfig::default(),
        Utc::now(),
    );
    assert_eq!(ids(&view.users), ["O2"]);
}

#[test]
fn attendees_see_fresh_peers_of_their_group_only() {
    let mut stale = at("A3", Role::Attendee, "g1", STAGE);
    stale.last_updated = Utc::now() - Duration::minutes(10);

    let all = partitions([
        at("A1", Role::Attendee, "g1", STAGE),
        at("A2", Role::Attendee, "g1", STAGE),
        stale,
        at("A4", Role::Attendee, "g2", STAGE),
        at("V1", Role::Volunteer, "g1", STAGE),
    ]);
    let view = visible_set(
        &observer("A1", Role::Attendee, "g1", None),
        &all,
        &[],
        &VisibilityConfig::default(),
        Utc::now(),
    );
    assert_eq!(ids(&view.users), ["A2"]);
}

#[test]
fn attendee_in_emergency_appears_only_as_incident() {
    let now = Utc::now();
    let all = partitions([
        at("A1", Role::Attendee, "g1", STAGE),
        at("A2", Role::Attendee, "g1", STAGE),
    ]);
    let incidents = [
        Emergency::new("A2", "g1", STAGE, None, now),
        Emergency::new("A9", "g2", STAGE, None, now),
    ];

    let view = visible_set(
        &observer("A1", Role::Attendee, "g1", None),
        &all,
        &incidents,
        &VisibilityConfig::default(),
        now,
    );
    assert!(view.users.is_empty());
    assert_eq!(view.emergencies.len(), 1);
    assert_eq!(view.emergencies[0].attendee_id, "A2");
}

#[test]
fn zoom_thirteen_keeps_the_nearest_twenty_five() {
    let volunteers = (0..40).map(|n| {
        let offset = f64::from(n) * 0.0005;
        at(
            &format!("V{n:02}"),
            Role::Volunteer,
            "g1",
            Coordinates::new(STAGE.latitude + offset, STAGE.longitude),
        )
    });
    let all = partitions(
        volunteers.chain([at("O1", Role::Organizer, "g1", STAGE)]),
    );

    let view = visible_set(
        &observer("O1", Role::Organizer, "g1", Some(13.0)),
        &all,
        &[],
        &VisibilityConfig::default(),
        Utc::now(),
    );
    assert_eq!(view.users.len(), 25);
    let expected: Vec<String> = (0..25).map(|n| format!("V{n:02}")).collect();
    assert_eq!(ids(&view.users), expected);
}
