use jiff::{Timestamp, tz::TimeZone};
use maud::{DOCTYPE, Markup, html};

use crate::{
    auth::{Capability, Principal},
    models::{MovieDto, ScreeningDto, TicketDto},
};

const TAILWIND_CDN: &str = "https://cdn.tailwindcss.com";

const INPUT: &str = "mt-1 w-full rounded-md border border-gray-300 px-3 py-2 focus:border-blue-500 focus:outline-none focus:ring-1 focus:ring-blue-500";
const BUTTON: &str = "rounded-md bg-blue-600 px-4 py-2 font-semibold text-white hover:bg-blue-700";
const DANGER: &str = "text-sm text-red-600 hover:text-red-800";

pub fn index_page(viewer: Option<&Principal>, screenings: &[ScreeningDto], tz: &TimeZone) -> String {
    page(
        "Now showing",
        viewer,
        html! {
            h1 class="text-3xl font-bold text-gray-900" { "Now showing" }
            @if screenings.is_empty() {
                (card(html! { p class="text-gray-600" { "No upcoming screenings." } }))
            } @else {
                div class="mt-8 space-y-4" {
                    @for s in screenings {
                        (screening_card(viewer, s, tz))
                    }
                }
            }
        },
    )
}

fn screening_card(viewer: Option<&Principal>, s: &ScreeningDto, tz: &TimeZone) -> Markup {
    html! {
        div class="bg-white shadow rounded-lg p-6" {
            div class="flex items-start justify-between gap-4" {
                div {
                    h2 class="text-xl font-semibold text-gray-900" { (s.movie_name) }
                    p class="mt-1 text-sm text-gray-500" {
                        (local_time(s.start_time, tz)) " · Room " (s.room) " · " (s.price) " Ft"
                    }
                }
                span class="text-sm font-medium text-gray-700" { (s.seats_left) " seats left" }
            }

            @if s.seats_left > 0 {
                form class="mt-4 flex flex-wrap items-end gap-3" method="post" action="/purchase" {
                    input type="hidden" name="screeningId" value=(s.id);
                    div {
                        label class="block text-xs text-gray-600" { "Tickets" }
                        input class=(INPUT) type="number" name="quantity" value="1" min="1" max=(s.seats_left) required;
                    }
                    @if viewer.is_none() {
                        div {
                            label class="block text-xs text-gray-600" { "Email" }
                            input class=(INPUT) type="email" name="email" required;
                        }
                        div {
                            label class="block text-xs text-gray-600" { "Phone" }
                            input class=(INPUT) type="tel" name="phoneNumber" required;
                        }
                    }
                    button class=(BUTTON) type="submit" { "Buy" }
                }
            } @else {
                p class="mt-4 text-sm font-semibold text-red-600" { "Sold out" }
            }
        }
    }
}

pub fn movies_page(viewer: Option<&Principal>, movies: &[MovieDto]) -> String {
    page(
        "Movies",
        viewer,
        html! {
            h1 class="text-3xl font-bold text-gray-900" { "Movies" }
            div class="mt-8 grid gap-4 md:grid-cols-2" {
                @for m in movies {
                    div class="bg-white shadow rounded-lg p-6" {
                        h2 class="text-lg font-semibold text-gray-900" { (m.name) }
                        p class="mt-1 text-sm text-gray-500" {
                            (m.genre) " · " (m.length) " min · " (m.age_limit) "+"
                        }
                    }
                }
            }
        },
    )
}

pub fn purchase_page(viewer: Option<&Principal>, tickets: &[TicketDto], tz: &TimeZone) -> String {
    page(
        "Purchase complete",
        viewer,
        html! {
            h1 class="text-3xl font-bold text-gray-900" { "Enjoy the show" }
            (card(html! {
                p class="text-gray-700" { (tickets.len()) " ticket(s) purchased." }
                (ticket_table(tickets, tz, false))
            }))
        },
    )
}

pub fn tickets_page(viewer: Option<&Principal>, tickets: &[TicketDto], tz: &TimeZone) -> String {
    let all = viewer.is_some_and(|p| p.can(Capability::ManageTickets));
    page(
        "Tickets",
        viewer,
        html! {
            h1 class="text-3xl font-bold text-gray-900" {
                @if all { "All tickets" } @else { "My tickets" }
            }
            p class="mt-2 text-sm text-gray-500" {
                "Tickets can be refunded until 4 hours before the screening."
            }
            @if tickets.is_empty() {
                (card(html! { p class="text-gray-600" { "No tickets yet." } }))
            } @else {
                (card(ticket_table(tickets, tz, true)))
            }
        },
    )
}

fn ticket_table(tickets: &[TicketDto], tz: &TimeZone, refundable: bool) -> Markup {
    html! {
        table class="mt-4 w-full text-left text-sm" {
            thead class="text-gray-500" {
                tr {
                    th class="py-2" { "#" }
                    th { "Movie" }
                    th { "Starts" }
                    th { "Room" }
                    th { "Contact" }
                    @if refundable { th {} }
                }
            }
            tbody class="divide-y divide-gray-100" {
                @for t in tickets {
                    tr {
                        td class="py-2" { (t.id) }
                        td { (t.movie_name) }
                        td { (local_time(t.start_time, tz)) }
                        td { (t.room) }
                        td { (t.email.as_deref().unwrap_or("")) }
                        @if refundable {
                            td class="text-right" {
                                form method="post" action=(format!("/tickets/{}/refund", t.id)) {
                                    button class=(DANGER) type="submit" { "Refund" }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

pub fn login_page(next: &str) -> String {
    page(
        "Log in",
        None,
        html! {
            (card(html! {
                h1 class="text-2xl font-bold text-gray-900" { "Log in" }
                form class="mt-6 space-y-4" method="post" action="/login" {
                    input type="hidden" name="next" value=(next);
                    (field("Email", "email", "email"))
                    (field("Password", "password", "password"))
                    button class=(BUTTON) type="submit" { "Log in" }
                }
                p class="mt-4 text-sm text-gray-600" {
                    "No account? " a class="text-blue-600 hover:text-blue-800" href="/register" { "Register" }
                }
            }))
        },
    )
}

pub fn register_page() -> String {
    page(
        "Register",
        None,
        html! {
            (card(html! {
                h1 class="text-2xl font-bold text-gray-900" { "Create an account" }
                form class="mt-6 space-y-4" method="post" action="/register" {
                    (field("Email", "email", "email"))
                    (field("Phone number", "phoneNumber", "tel"))
                    (field("Password", "password", "password"))
                    p class="text-xs text-gray-500" { "At least 6 characters." }
                    button class=(BUTTON) type="submit" { "Register" }
                }
            }))
        },
    )
}

pub fn admin_page(
    viewer: Option<&Principal>,
    movies: &[MovieDto],
    screenings: &[ScreeningDto],
    tz: &TimeZone,
) -> String {
    page(
        "Admin",
        viewer,
        html! {
            h1 class="text-3xl font-bold text-gray-900" { "Catalog" }

            (card(html! {
                h2 class="text-lg font-semibold text-gray-900" { "Add movie" }
                form class="mt-4 grid gap-4 md:grid-cols-4" method="post" action="/admin/movies" {
                    (field("Title", "name", "text"))
                    (field("Genre", "genre", "text"))
                    (field("Length (min)", "length", "number"))
                    (field("Age limit", "ageLimit", "number"))
                    div { button class=(BUTTON) type="submit" { "Add" } }
                }
                ul class="mt-6 divide-y divide-gray-100" {
                    @for m in movies {
                        li class="flex items-center justify-between py-2" {
                            span { (m.name) " (" (m.length) " min)" }
                            form method="post" action=(format!("/admin/movies/{}/delete", m.id)) {
                                button class=(DANGER) type="submit" { "Delete" }
                            }
                        }
                    }
                }
            }))

            (card(html! {
                h2 class="text-lg font-semibold text-gray-900" { "Add screening" }
                form class="mt-4 grid gap-4 md:grid-cols-3" method="post" action="/admin/screenings" {
                    div {
                        label class="block text-sm font-medium text-gray-700" { "Movie" }
                        select class=(INPUT) name="movieId" required {
                            @for m in movies {
                                option value=(m.id) { (m.name) }
                            }
                        }
                    }
                    (field("Starts", "startTime", "datetime-local"))
                    (field("Room", "room", "number"))
                    (field("Capacity", "capacity", "number"))
                    (field("Price", "price", "number"))
                    div { button class=(BUTTON) type="submit" { "Add" } }
                }
                ul class="mt-6 divide-y divide-gray-100" {
                    @for s in screenings {
                        li class="flex items-center justify-between py-2" {
                            span {
                                (s.movie_name) " · " (local_time(s.start_time, tz))
                                " · room " (s.room) " · " (s.seats_sold) "/" (s.capacity) " sold"
                            }
                            form method="post" action=(format!("/admin/screenings/{}/delete", s.id)) {
                                button class=(DANGER) type="submit" { "Delete" }
                            }
                        }
                    }
                }
            }))
        },
    )
}

pub fn error_page(message: String) -> String {
    page(
        "Error",
        None,
        html! {
            (card(html! {
                h1 class="text-2xl font-bold text-gray-900" { "Error" }
                p class="mt-4 text-gray-700" { (message) }
                a class="mt-6 inline-block text-blue-600 hover:text-blue-800" href="/" { "Back" }
            }))
        },
    )
}

fn page(title: &str, viewer: Option<&Principal>, body: Markup) -> String {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (title) " · Cinebook" }
                script src=(TAILWIND_CDN) {}
            }
            body class="min-h-screen bg-gray-50" {
                (nav(viewer))
                main class="max-w-4xl mx-auto px-6 py-10" { (body) }
            }
        }
    }
    .into_string()
}

fn nav(viewer: Option<&Principal>) -> Markup {
    html! {
        nav class="bg-white shadow" {
            div class="max-w-4xl mx-auto flex items-center gap-6 px-6 py-4 text-sm" {
                a class="font-bold text-gray-900" href="/" { "Cinebook" }
                a class="text-gray-600 hover:text-gray-900" href="/movies" { "Movies" }
                @if let Some(p) = viewer {
                    a class="text-gray-600 hover:text-gray-900" href="/tickets" { "Tickets" }
                    @if p.can(Capability::ManageCatalog) {
                        a class="text-gray-600 hover:text-gray-900" href="/admin" { "Admin" }
                    }
                    span class="ml-auto text-gray-500" { (p.email) }
                    form method="post" action="/logout" {
                        button class="text-blue-600 hover:text-blue-800" type="submit" { "Log out" }
                    }
                } @else {
                    a class="ml-auto text-blue-600 hover:text-blue-800" href="/login" { "Log in" }
                }
            }
        }
    }
}

fn card(inner: Markup) -> Markup {
    html! { div class="mt-8 bg-white shadow rounded-lg p-8" { (inner) } }
}

fn field(label: &str, name: &str, kind: &str) -> Markup {
    html! {
        div {
            label class="block text-sm font-medium text-gray-700" for=(name) { (label) }
            input class=(INPUT) type=(kind) name=(name) id=(name) required;
        }
    }
}

fn local_time(ts: Timestamp, tz: &TimeZone) -> String {
    ts.to_zoned(tz.clone()).strftime("%Y-%m-%d %H:%M").to_string()
}
