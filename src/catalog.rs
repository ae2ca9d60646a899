//! Option catalogs for the descriptive profile attributes.
//!
//! Values are the stored codes; labels are what a picker shows.

pub type Options = &'static [(&'static str, &'static str)];

pub const AGES: Options = &[
    ("18", "18-21"),
    ("21", "21-25"),
    ("25", "25-30"),
    ("30", "30-40"),
    ("40", "40-50"),
    ("50", "50+"),
    ("60", "60+"),
    ("70", "70+"),
];

pub const GENDERS: Options = &[
    ("F", "Female"),
    ("M", "Male"),
    ("T", "Transgender"),
    ("O", "Other"),
];

pub const ETHNICITIES: Options = &[
    ("AR", "Arab"),
    ("A", "Asian"),
    ("B", "Black"),
    ("C", "Caucasian (White)"),
    ("L", "Latin"),
    ("M", "Mixed"),
];

pub const BODY_SIZES: Options = &[
    ("S", "Slim / Slender"),
    ("A", "Athletic / Toned"),
    ("M", "Average"),
    ("G", "Muscular"),
    ("C", "Curvy"),
    ("L", "Big & Beautiful"),
];

pub const SHOE_SIZES: Options = &[
    ("4", "US 4, UK 2, EU 34"),
    ("5", "US 5, UK 3, EU 36"),
    ("6", "US 6, UK 4, EU 37"),
    ("7", "US 7, UK 5, EU 38"),
    ("8", "US 8, UK 6, EU 39"),
    ("9", "US 9, UK 7, EU 40"),
    ("10", "US 10, UK 8, EU 41"),
    ("11", "US 11, UK 9, EU 42"),
    ("12", "US 12, UK 10, EU 43"),
    ("13", "US 13, UK 11, EU 44"),
    ("14", "US 14, UK 12, EU 45"),
    ("15", "US 15, UK 13, EU 46"),
    ("16", "US 16+, UK 14+, EU 47+"),
];

pub const YES_NO: Options = &[("1", "Yes"), ("0", "No")];

pub const OCCUPATIONS: Options = &[
    ("C", "Cabin Crew"),
    ("N", "Nurse / Healthcare Worker"),
    ("M", "Model"),
    ("F", "Fitness Pro"),
    ("E", "Entrepreneur"),
    ("T", "Teacher"),
    ("P", "Stay At Home Parent"),
    ("A", "Military / Police"),
    ("S", "Student"),
    ("O", "Office Worker"),
    ("B", "Blue Collar Worker"),
    ("D", "Digital Nomad / Tech Guru"),
];

pub const HAIR_COLORS: Options = &[
    ("black", "Black"),
    ("brown", "Brown"),
    ("blonde", "Blonde"),
    ("red", "Red"),
    ("gray", "Gray"),
    ("white", "White"),
    ("blue", "Blue"),
    ("pink", "Pink"),
    ("purple", "Purple"),
    ("green", "Green"),
];

pub const EYE_COLORS: Options = &[
    ("brown", "Brown"),
    ("blue", "Blue"),
    ("green", "Green"),
    ("hazel", "Hazel"),
    ("gray", "Gray"),
    ("amber", "Amber"),
];

pub const HEIGHTS: Options = &[
    ("petite", "Petite"),
    ("short", "Short"),
    ("average", "Average"),
    ("tall", "Tall"),
    ("very_tall", "Very Tall"),
];

pub const RELATIONSHIP_STATUSES: Options = &[
    ("single", "Single"),
    ("in_relationship", "In a Relationship"),
    ("married", "Married"),
    ("divorced", "Divorced"),
    ("its_complicated", "It's Complicated"),
    ("open_relationship", "Open Relationship"),
    ("widowed", "Widowed"),
];

pub const PAYMENT_METHODS: Options = &[
    ("1", "PayPal"),
    ("2", "Venmo"),
    ("3", "CashApp"),
    ("4", "Amazon Gift Card"),
    ("10", "Amazon WishList"),
    ("5", "Bank Transfer"),
    ("6", "Stripe"),
    ("7", "Google Pay"),
    ("8", "Cryptocurrency"),
    ("9", "Buy Me A Coffee"),
    ("12", "Wishlist"),
    ("13", "Revolut"),
];

/// Offered item codes, grouped the way the picker shows them.
pub const OFFER_GROUPS: &[(&str, Options)] = &[
    (
        "Underwear",
        &[("5", "Panties"), ("6", "Thongs"), ("7", "Lingerie"), ("8", "Bras")],
    ),
    (
        "Shoes",
        &[
            ("10", "High Heels"),
            ("11", "Flat Shoes"),
            ("12", "Sneakers"),
            ("13", "Slippers"),
            ("14", "Uniform Shoes"),
            ("22", "Boots"),
        ],
    ),
    (
        "Hosiery",
        &[
            ("16", "Socks"),
            ("17", "Pantyhose"),
            ("18", "Stockings"),
            ("526", "Buy Feet Pics"),
            ("527", "Sell Feet Pics"),
        ],
    ),
    (
        "Clothing",
        &[
            ("30", "Skirts"),
            ("31", "Dresses"),
            ("33", "Tops"),
            ("34", "Gym Clothes"),
            ("36", "Other Clothing"),
            ("43", "Swimwear"),
        ],
    ),
    (
        "Extras",
        &[
            ("4", "Accessories"),
            ("24", "Photo Sets"),
            ("25", "Video Clips"),
            ("26", "Experiences"),
        ],
    ),
    ("Instant Content", &[("41", "Instant Pics"), ("44", "Instant Vids")]),
];

pub fn contains(options: Options, value: &str) -> bool {
    options.iter().any(|(v, _)| *v == value)
}

pub fn label(options: Options, value: &str) -> Option<&'static str> {
    options.iter().find(|(v, _)| *v == value).map(|(_, l)| *l)
}

pub fn is_offer_code(value: &str) -> bool {
    OFFER_GROUPS.iter().any(|(_, opts)| contains(opts, value))
}

/// Country codes are stored as ISO 3166 alpha-2 ("OT" for other).
pub fn is_country_code(value: &str) -> bool {
    value.len() == 2 && value.bytes().all(|b| b.is_ascii_uppercase())
}
