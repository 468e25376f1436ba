// Subset of Django's `auth_user` table; the schema itself is owned by the
// main backend and only read here.

diesel::table! {
    auth_user (id) {
        id -> Int4,
        username -> Varchar,
        first_name -> Varchar,
        last_name -> Varchar,
        email -> Varchar,
        is_active -> Bool,
        date_joined -> Timestamptz,
    }
}
