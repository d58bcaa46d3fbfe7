use shared::Dashboard;

#[derive(Debug, Clone)]
pub struct AddDashboardCommand {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct AddDashboardResult {
    pub dashboard: Dashboard,
}

#[derive(Debug, Clone)]
pub struct RenameDashboardCommand {
    pub dashboard_id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct RenameDashboardResult {
    pub success_message: String,
}

#[derive(Debug, Clone)]
pub struct RemoveDashboardCommand {
    pub dashboard_id: String,
}

#[derive(Debug, Clone)]
pub struct RemoveDashboardResult {
    pub success_message: String,
}

#[derive(Debug, Clone)]
pub struct SetCurrentDashboardCommand {
    pub dashboard_id: String,
}

#[derive(Debug, Clone)]
pub struct ListDashboardsResult {
    pub dashboards: Vec<Dashboard>,
    pub current_dashboard_id: String,
}
