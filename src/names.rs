/// Random display names for participants who never chose one.
use rand::seq::SliceRandom;

const NAMES: &[&str] = &[
    "James", "Christopher", "Ronald", "Mary", "Lisa", "Michelle", "John",
    "Daniel", "Anthony", "Patricia", "Nancy", "Laura", "Robert", "Paul",
    "Kevin", "Linda", "Karen", "Sarah", "Michael", "Mark", "Jason", "Barbara",
    "Betty", "Kimberly", "William", "Donald", "Jeff", "Elizabeth", "Helen",
    "Deborah", "David", "George", "Jennifer", "Sandra", "Richard", "Kenneth",
    "Maria", "Donna", "Charles", "Steven", "Susan", "Carol", "Joseph",
    "Edward", "Margaret", "Ruth", "Thomas", "Brian", "Dorothy", "Sharon",
];

const SURNAMES: &[&str] = &[
    "Smith", "Anderson", "Clark", "Wright", "Mitchell", "Johnson", "Thomas",
    "Rodriguez", "Lopez", "Perez", "Williams", "Jackson", "Lewis", "Hill",
    "Roberts", "Jones", "White", "Lee", "Scott", "Turner", "Brown", "Harris",
    "Walker", "Green", "Phillips", "Davis", "Martin", "Hall", "Adams",
    "Campbell", "Miller", "Thompson", "Allen", "Baker", "Parker", "Wilson",
    "Garcia", "Young", "Gonzalez", "Evans", "Moore", "Martinez", "Hernandez",
    "Nelson", "Edwards", "Taylor", "Robinson", "King", "Carter", "Collins",
];

/// Pick a random "First Last" display name.
pub fn random_name() -> String {
    let mut rng = rand::thread_rng();
    let name = NAMES.choose(&mut rng).expect("name table is non-empty");
    let surname = SURNAMES
        .choose(&mut rng)
        .expect("surname table is non-empty");
    format!("{} {}", name, surname)
}
